pub mod page_repository_sqlx;
pub mod plugin_store_sqlx;
