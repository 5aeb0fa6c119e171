// Test modules for Inbox Sync
// Each module covers the public surface of the corresponding source module

mod support;

mod connection_tests;
mod dispatcher_tests;
mod reconcile_tests;
