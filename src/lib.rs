// Module layout (Clean Architecture style)
// - bootstrap: configuration and application context
// - infrastructure: SQLite stores and filesystem bundle staging
// - presentation: HTTP handlers and routing
// - application: ports, use cases and the lifecycle manager
// - domain: plugin definitions, bundles and page templates

pub mod application;
pub mod bootstrap;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
