pub mod ethertype;
pub mod packet;
