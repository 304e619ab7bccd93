pub mod bundle;
pub mod catalog;
pub mod definition;
pub mod descriptor;
pub mod page;
