// SPDX-License-Identifier: Apache-2.0

//! Utility methods and types used throughout Kubescan.

pub mod fs;
pub mod http;
pub mod redacted;
