/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

/// Proto-generated modules.
///
/// `tonic::include_proto!` expands to an `include!` of the file that
/// prost/tonic-build wrote into `OUT_DIR` during the build script.
pub mod tutti_v1 {
    // Package name declared in tutti.proto is `tutti.v1`.
    // tonic-build turns the dots into underscores for the file name, so the
    // generated file is `tutti.v1.rs` → referenced as "tutti.v1".
    tonic::include_proto!("tutti.v1");
}
