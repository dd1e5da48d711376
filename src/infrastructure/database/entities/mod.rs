//! Database entities, one module per catalogue table

pub mod db_info;
pub mod file;
pub mod file_layout;
pub mod fs_info;
pub mod image_info;
pub mod image_name;
pub mod object;
pub mod vs_info;
pub mod vs_part;
