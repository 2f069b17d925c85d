/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::fmt;
use core::fmt::Formatter;
use core::ops::{BitAnd, Not};
use num_integer::Integer;

/// Returns the previous integer multiple of `multiple` or `n` if already a
/// multiple of `multiple`.
pub fn align_down<T>(n: T, multiple: T) -> T
    where T: Integer + Not<Output = T> + BitAnd<Output = T> + Copy
{
    n & !(multiple - T::one())
}

/// Register value formatter, prints `0000'0000`.
pub struct R<T>(pub T);

impl fmt::LowerHex for R<u32> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", &(self.0 >> 16))?;
        write!(f, "'")?;
        write!(f, "{:04x}", &(self.0 & 0xffff))
    }
}

impl fmt::LowerHex for R<u16> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", &self.0)
    }
}

/// Copies `src` into `dst` followed by a NUL byte. Returns the number of bytes
/// written excluding the terminator, or `None` when `dst` is too small, in
/// which case `dst` is left untouched.
pub fn copy_c_string(src: &str, dst: &mut [u8]) -> Option<usize> {
    let len = src.len();
    if len >= dst.len() {
        return None;
    }

    dst[..len].copy_from_slice(src.as_bytes());
    dst[len] = 0;

    Some(len)
}
