// SPDX-License-Identifier: GPL-3.0-only

//! D-Bus wire helpers

pub mod bytestring;
