pub mod failing_store;
