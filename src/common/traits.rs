use crate::common::cursor::WriteCursor;
use crate::error::RequestError;

/// Anything that can write itself into a PDU body.
///
/// `Sync` so that a `&dyn Serialize` can be held across an await point
/// inside a spawned session task.
pub(crate) trait Serialize: Sync {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError>;
}
