pub mod bundles;
pub mod db;
