//! Shared fixtures for unit tests.
