//! Empty lib target; this crate exists only to host the `integration` test
//! binary declared in `Cargo.toml`.
