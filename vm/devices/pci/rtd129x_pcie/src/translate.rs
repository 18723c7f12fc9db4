// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Temporary retargeting of the controller's address translation window.
//!
//! The configuration window region is only 4K wide. Offsets outside the first
//! page, and the two erratum offsets inside every page, are reached by moving
//! the translation base so that the access lands on a physical offset the
//! controller handles correctly. The previous translation is restored when the
//! [`TranslationGuard`] is dropped.

use crate::regs::RegisterIo;
use crate::spec::ctrl;
use crate::spec::window;

/// How an offset must be translated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TranslationWindow {
    /// Reachable as-is.
    Identity,
    /// Beyond the first page; the base is moved using the default mask.
    HighPage,
    /// An erratum offset; the mask is narrowed for the access.
    Erratum,
}

impl TranslationWindow {
    /// Classifies `offset`.
    pub fn for_offset(offset: u32) -> Self {
        if window::ERRATUM_OFFSETS.contains(&(offset & window::PAGE_OFFSET_MASK)) {
            Self::Erratum
        } else if offset > window::PAGE_OFFSET_MASK {
            Self::HighPage
        } else {
            Self::Identity
        }
    }

    fn mask(self) -> u32 {
        match self {
            Self::Identity => 0,
            Self::HighPage => window::MASK_4K,
            Self::Erratum => window::MASK_2K,
        }
    }
}

/// An active translation for one access.
#[must_use]
pub struct TranslationGuard<'a, R: RegisterIo + ?Sized> {
    ctrl: &'a R,
    window: TranslationWindow,
    offset: u32,
    saved_base: u32,
}

/// Retargets the translation window so that `offset` can be reached.
///
/// The caller must hold the access lock for as long as the guard is alive.
pub fn translate<R: RegisterIo + ?Sized>(ctrl: &R, offset: u32) -> TranslationGuard<'_, R> {
    let kind = TranslationWindow::for_offset(offset);
    let mut saved_base = 0;
    if kind != TranslationWindow::Identity {
        if kind == TranslationWindow::Erratum {
            ctrl.write_u32(ctrl::WINDOW_MASK, window::MASK_2K);
        }
        saved_base = ctrl.read_u32(ctrl::WINDOW_BASE);
        // The page bits are ORed into the live base; its low bits are not
        // cleared first.
        ctrl.write_u32(ctrl::WINDOW_BASE, saved_base | (offset & kind.mask()));
        tracing::trace!(offset, ?kind, saved_base, "translation window moved");
    }
    TranslationGuard {
        ctrl,
        window: kind,
        offset,
        saved_base,
    }
}

impl<R: RegisterIo + ?Sized> TranslationGuard<'_, R> {
    /// The offset within the configuration window region to access.
    pub fn physical_offset(&self) -> usize {
        (self.offset & !self.window.mask()) as usize
    }
}

impl<R: RegisterIo + ?Sized> Drop for TranslationGuard<'_, R> {
    fn drop(&mut self) {
        match self.window {
            TranslationWindow::Identity => {}
            TranslationWindow::HighPage => {
                self.ctrl.write_u32(ctrl::WINDOW_BASE, self.saved_base);
            }
            TranslationWindow::Erratum => {
                self.ctrl.write_u32(ctrl::WINDOW_BASE, self.saved_base);
                self.ctrl.write_u32(ctrl::WINDOW_MASK, window::MASK_4K);
            }
        }
    }
}
