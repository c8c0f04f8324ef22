pub mod embedo;
pub mod moonbox;
pub mod nimbus;
pub mod vidora;
