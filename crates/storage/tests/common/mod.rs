pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{chunked_source, gated_source, read_all, seeded_bytes, temp_file_count, temp_store};
