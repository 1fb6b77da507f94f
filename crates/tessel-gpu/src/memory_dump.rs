//! Diagnostic sink for resource memory statistics.

/// Receives one call per cached GPU resource.
pub trait MemoryDump {
    /// `backing_id` identifies the backend object behind the resource.
    fn dump_resource(&mut self, name: &str, bytes: usize, backing_id: &str);
}

/// One recorded [`MemoryDump::dump_resource`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDumpEntry {
    pub name: String,
    pub bytes: usize,
    pub backing_id: String,
}

impl MemoryDump for Vec<MemoryDumpEntry> {
    fn dump_resource(&mut self, name: &str, bytes: usize, backing_id: &str) {
        self.push(MemoryDumpEntry {
            name: name.to_string(),
            bytes,
            backing_id: backing_id.to_string(),
        });
    }
}
