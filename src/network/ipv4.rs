pub mod addr;
pub mod packet;
pub mod protocol;
