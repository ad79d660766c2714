//! Integration tests for the tierstore persistence client

mod crud;
mod migration;
mod observe;
mod test_utils;
