//! Workspace root. Carries no runtime code of its own — it exists to host
//! the end-to-end integration suites under `tests/integration/`, which
//! exercise `display-fabric-server` as a whole through an in-process
//! `axum::Router` rather than any individual crate's unit tests.
