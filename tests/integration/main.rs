// Integration test suite for home-hub
//
// Organized into focused modules by surface area. All modules share the
// common::TestClient for store/archive lifecycle management.

mod common;

mod devices;
mod events;
mod system;
mod webhook;
