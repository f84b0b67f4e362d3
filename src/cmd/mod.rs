pub mod captions;
pub mod doctor;
pub mod render;
pub mod timing;
