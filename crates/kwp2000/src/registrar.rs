use crate::error::{Error, Result};
use crate::session::Session;
use crate::transport::Transport;
use crate::types::{FieldDescriptor, FieldList};
use tracing::{debug, info};

/// Binds a field list, in order, to the record under one local identifier.
///
/// The bind order is the byte order the ECU uses when it later returns the
/// record, so fields are bound strictly one after another and the first
/// failure ends the phase.
pub struct Registrar<'s, T> {
    session: &'s mut Session<T>,
    local_id: u8,
}

impl<'s, T: Transport> Registrar<'s, T> {
    pub fn new(session: &'s mut Session<T>, local_id: u8) -> Self {
        Self { session, local_id }
    }

    /// Drop whatever was defined under the local identifier before.
    pub async fn clear(&mut self) -> Result<()> {
        self.session
            .clear_local_identifier(self.local_id)
            .await
            .map_err(|source| Error::ClearDefinition {
                local_id: self.local_id,
                source,
            })
    }

    /// Bind one field to record position `index`.
    pub async fn register(&mut self, index: usize, field: &FieldDescriptor) -> Result<()> {
        let position = u8::try_from(index).map_err(|_| Error::Registration {
            index,
            name: field.name.clone(),
            source: crate::error::ProtocolError::Malformed("record position above 255"),
        })?;
        debug!(
            index,
            name = %field.name,
            method = %field.method,
            address = field.address,
            "binding field"
        );
        self.session
            .define_local_identifier(self.local_id, position, field)
            .await
            .map_err(|source| Error::Registration {
                index,
                name: field.name.clone(),
                source,
            })
    }

    /// Clear the definition, then bind every field of `fields` in list order.
    pub async fn register_all(&mut self, fields: &FieldList) -> Result<()> {
        self.clear().await?;
        for (index, field) in fields.iter().enumerate() {
            self.register(index, field).await?;
        }
        info!(
            fields = fields.len(),
            record_len = fields.record_len(),
            "record 0x{:02X} defined",
            self.local_id
        );
        Ok(())
    }
}
