pub mod bundle_store;
pub mod page_repository;
pub mod plugin_store;
