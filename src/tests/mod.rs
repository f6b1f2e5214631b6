//! Integration-level suites running the full stack against a scripted
//! connection double.

mod support;

mod persistence;
