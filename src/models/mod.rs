pub mod bulk;
pub mod index_meta;
pub mod search;
pub mod server_info;
