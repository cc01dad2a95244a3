use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DoctorId(pub String);

/// One working-hours block within a day, e.g. morning 08:00-12:00.
/// Times are `HH:MM` strings in the clinic's local timezone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoursBlock {
    pub label: String,
    pub start: String,
    pub end: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub name: String,
    pub calendar_id: String,
    pub contact_number: Option<String>,
    pub procedures: Vec<String>,
    pub insurances: Vec<String>,
    /// ISO weekday numbers, Monday = 1.
    pub available_weekdays: Vec<u8>,
    pub working_hours: Vec<HoursBlock>,
    pub slot_minutes: u32,
    pub active: bool,
}

impl Doctor {
    pub fn offers_procedure(&self, procedure: &str) -> bool {
        let wanted = procedure.trim().to_lowercase();
        self.procedures.iter().any(|p| p.to_lowercase() == wanted)
    }

    pub fn accepts_insurance(&self, insurance: &str) -> bool {
        let wanted = insurance.trim().to_lowercase();
        self.insurances.iter().any(|i| i.to_lowercase() == wanted)
    }
}
