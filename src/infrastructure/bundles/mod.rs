pub mod filesystem_store;
