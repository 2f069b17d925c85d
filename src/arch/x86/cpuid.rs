/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use x86::cpuid::CpuId;

/// Initial local APIC ID of the executing core, as reported by CPUID leaf 1.
/// Cores without the leaf are treated as the bootstrap processor.
pub fn local_apic_id() -> u8 {
    CpuId::new()
        .get_feature_info()
        .map(|info| info.initial_local_apic_id())
        .unwrap_or(0)
}
