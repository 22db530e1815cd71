pub mod async_helpers;
