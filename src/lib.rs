//! Workspace root. Carries the cross-crate tests under `tests/`; the code
//! lives in the `shared`, `server` and `client` members.
