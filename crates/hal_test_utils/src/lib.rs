// Copyright 2025 Irreducible Inc.

pub mod device;
pub mod recording;
