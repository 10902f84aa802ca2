//! Integration tests for the relay workspace live under `tests/`.
