use serde::Serialize;

/// Aggregate result of a batch reparse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Success,
    NoMessages,
    NoParserAssociated,
    NoDevicesAssociated,
    /// The device was removed while the batch was running
    DeviceNotFound,
    Cancelled,
    /// The store failed while loading a device's records
    Failed,
}

impl BatchOutcome {
    /// One-line status text shown to users
    pub fn message(&self) -> &'static str {
        match self {
            BatchOutcome::Success => "Success",
            BatchOutcome::NoMessages => "This device has no messages.",
            BatchOutcome::NoParserAssociated => "No parser is associated to this device.",
            BatchOutcome::NoDevicesAssociated => "No devices are associated to this parser.",
            BatchOutcome::DeviceNotFound => "No device found.",
            BatchOutcome::Cancelled => "Parsing was cancelled.",
            BatchOutcome::Failed => "Messages of this device could not be loaded.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RecordStatus {
    /// Output stored
    Parsed,
    /// No raw data, or the script returned null
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordReport {
    pub message_id: String,
    #[serde(flatten)]
    pub status: RecordStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceReport {
    pub device_id: String,
    pub outcome: BatchOutcome,
    pub records: Vec<RecordReport>,
}

impl DeviceReport {
    pub fn empty(device_id: impl Into<String>, outcome: BatchOutcome) -> Self {
        Self {
            device_id: device_id.into(),
            outcome,
            records: Vec::new(),
        }
    }

    pub fn count(&self, status: fn(&RecordStatus) -> bool) -> usize {
        self.records.iter().filter(|r| status(&r.status)).count()
    }
}

/// The single report produced once every record of every device is done
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub devices: Vec<DeviceReport>,
}

impl BatchReport {
    pub fn without_devices(outcome: BatchOutcome) -> Self {
        Self {
            outcome,
            devices: Vec::new(),
        }
    }

    pub fn message(&self) -> &'static str {
        self.outcome.message()
    }

    pub fn parsed_count(&self) -> usize {
        self.devices
            .iter()
            .map(|d| d.count(|s| matches!(s, RecordStatus::Parsed)))
            .sum()
    }

    pub fn failed_count(&self) -> usize {
        self.devices
            .iter()
            .map(|d| d.count(|s| matches!(s, RecordStatus::Failed(_))))
            .sum()
    }
}
