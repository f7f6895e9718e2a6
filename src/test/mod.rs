//! Shared fixtures for service tests.

mod context;

pub(crate) use context::TestContext;
