/// Maximum count allowed in read/write requests
pub mod limits {
    /// Maximum count allowed in a read holding/input registers request
    pub const MAX_READ_REGISTERS_COUNT: u16 = 125;
    /// Maximum count allowed in a write multiple registers request
    pub const MAX_WRITE_REGISTERS_COUNT: u16 = 123;
}
