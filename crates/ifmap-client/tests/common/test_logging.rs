/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */

use tracing::metadata::LevelFilter;
use tracing_subscriber::{filter::EnvFilter, fmt::TestWriter, prelude::*};

/// Initializes `tracing` for integration tests. Output is only shown for failing tests.
pub fn init() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::DEBUG.into())
        .from_env_lossy()
        .add_directive("rustls=warn".parse().unwrap())
        .add_directive("hickory_proto=warn".parse().unwrap())
        .add_directive("hickory_resolver=warn".parse().unwrap());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::Layer::default()
                .compact()
                .with_writer(TestWriter::new),
        )
        .with(env_filter)
        .init();
}
