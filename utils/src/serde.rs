pub mod json_line;
pub mod yaml_file;
