//! Batch writer test suite

mod batch_writer_tests;
