pub mod names;
pub mod path_security;
pub mod tar;
