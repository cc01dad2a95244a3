use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use recepta_core::domain::booking::Booking;
use recepta_core::domain::message::AgentStage;
use recepta_core::domain::user::{SessionId, UserUpdate};
use recepta_db::repositories::{
    BookingRepository, DoctorRepository, FileRepository, KnowledgeRepository, UserRepository,
};
use recepta_messaging::gateway::{BookingNotice, MessageGateway};
use recepta_messaging::reminders::{ReminderRequest, ReminderScheduler};

use crate::calendar::CalendarClient;
use crate::embedding::EmbeddingClient;
use crate::llm::{ToolCallRequest, ToolSpec};

/// Every tool an agent can invoke. Dispatch is an exhaustive match, so
/// adding a tool means the compiler walks you through every site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolId {
    UpdateRegistration,
    CompleteRegistration,
    SearchKnowledge,
    SendFile,
    ListDoctors,
    DoctorDetails,
    CheckAvailability,
    BookAppointment,
    CancelAppointment,
}

impl ToolId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateRegistration => "update_registration",
            Self::CompleteRegistration => "complete_registration",
            Self::SearchKnowledge => "search_knowledge",
            Self::SendFile => "send_file",
            Self::ListDoctors => "list_doctors",
            Self::DoctorDetails => "doctor_details",
            Self::CheckAvailability => "check_availability",
            Self::BookAppointment => "book_appointment",
            Self::CancelAppointment => "cancel_appointment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "update_registration" => Some(Self::UpdateRegistration),
            "complete_registration" => Some(Self::CompleteRegistration),
            "search_knowledge" => Some(Self::SearchKnowledge),
            "send_file" => Some(Self::SendFile),
            "list_doctors" => Some(Self::ListDoctors),
            "doctor_details" => Some(Self::DoctorDetails),
            "check_availability" => Some(Self::CheckAvailability),
            "book_appointment" => Some(Self::BookAppointment),
            "cancel_appointment" => Some(Self::CancelAppointment),
            _ => None,
        }
    }

    /// Tool exchanges kept in the chat log so later turns still see the
    /// doctor the patient picked.
    pub fn persists_for_context(&self) -> bool {
        matches!(self, Self::ListDoctors | Self::DoctorDetails)
    }

    pub fn for_stage(stage: AgentStage) -> &'static [ToolId] {
        match stage {
            AgentStage::Receptionist => &[Self::UpdateRegistration, Self::CompleteRegistration],
            AgentStage::Orchestrator => &[],
            AgentStage::Rag => &[Self::SearchKnowledge, Self::SendFile],
            AgentStage::Scheduling => &[
                Self::ListDoctors,
                Self::DoctorDetails,
                Self::CheckAvailability,
                Self::BookAppointment,
                Self::CancelAppointment,
            ],
        }
    }

    pub fn specs_for_stage(stage: AgentStage) -> Vec<ToolSpec> {
        Self::for_stage(stage).iter().map(ToolId::spec).collect()
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec { name: self.as_str(), description: self.description(), parameters: self.parameters() }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::UpdateRegistration => {
                "Save patient profile fields (full name, document, insurance, free-form notes). \
                 Only pass the fields the patient just provided."
            }
            Self::CompleteRegistration => {
                "Mark the registration as complete. Use only after full name, document, and \
                 insurance have all been collected."
            }
            Self::SearchKnowledge => {
                "Look up clinic information in the knowledge base. Use before answering any \
                 question about the clinic, its services, or prices; never invent answers."
            }
            Self::SendFile => "Send an institutional file to the patient by category.",
            Self::ListDoctors => {
                "List doctors available for a procedure, optionally filtered by insurance. \
                 Returns id and name only."
            }
            Self::DoctorDetails => {
                "Fetch full details for one doctor after the patient picked from the list."
            }
            Self::CheckAvailability => {
                "Check whether a time window is free on a doctor's calendar. Call before booking."
            }
            Self::BookAppointment => {
                "Create the appointment after check_availability reported the window free."
            }
            Self::CancelAppointment => {
                "Cancel an existing appointment identified by date and, if needed, time."
            }
        }
    }

    fn parameters(&self) -> serde_json::Value {
        match self {
            Self::UpdateRegistration => serde_json::json!({
                "type": "object",
                "properties": {
                    "full_name": {"type": "string"},
                    "document": {"type": "string"},
                    "insurance": {"type": "string"},
                    "notes": {"type": "object"},
                },
            }),
            Self::CompleteRegistration => serde_json::json!({
                "type": "object",
                "properties": {},
            }),
            Self::SearchKnowledge => serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "category": {"type": "string", "enum": ["about", "services"]},
                },
                "required": ["query"],
            }),
            Self::SendFile => serde_json::json!({
                "type": "object",
                "properties": {"category": {"type": "string"}},
                "required": ["category"],
            }),
            Self::ListDoctors => serde_json::json!({
                "type": "object",
                "properties": {
                    "procedure": {"type": "string"},
                    "insurance": {"type": "string"},
                },
                "required": ["procedure"],
            }),
            Self::DoctorDetails => serde_json::json!({
                "type": "object",
                "properties": {"doctor_id": {"type": "string"}},
                "required": ["doctor_id"],
            }),
            Self::CheckAvailability => serde_json::json!({
                "type": "object",
                "properties": {
                    "calendar_id": {"type": "string"},
                    "start": {"type": "string", "description": "ISO 8601 start"},
                    "end": {"type": "string", "description": "ISO 8601 end"},
                },
                "required": ["calendar_id", "start", "end"],
            }),
            Self::BookAppointment => serde_json::json!({
                "type": "object",
                "properties": {
                    "calendar_id": {"type": "string"},
                    "summary": {"type": "string"},
                    "procedure": {"type": "string"},
                    "start": {"type": "string", "description": "ISO 8601 start"},
                    "end": {"type": "string", "description": "ISO 8601 end"},
                    "description": {"type": "string"},
                },
                "required": ["calendar_id", "summary", "procedure", "start", "end", "description"],
            }),
            Self::CancelAppointment => serde_json::json!({
                "type": "object",
                "properties": {
                    "calendar_id": {"type": "string"},
                    "date": {"type": "string", "description": "YYYY-MM-DD"},
                    "time": {"type": "string", "description": "HH:MM"},
                },
                "required": ["calendar_id", "date"],
            }),
        }
    }
}

#[derive(Deserialize)]
struct UpdateRegistrationArgs {
    full_name: Option<String>,
    document: Option<String>,
    insurance: Option<String>,
    notes: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SearchKnowledgeArgs {
    query: String,
    category: Option<String>,
}

#[derive(Deserialize)]
struct SendFileArgs {
    category: String,
}

#[derive(Deserialize)]
struct ListDoctorsArgs {
    procedure: String,
    insurance: Option<String>,
}

#[derive(Deserialize)]
struct DoctorDetailsArgs {
    doctor_id: String,
}

#[derive(Deserialize)]
struct CheckAvailabilityArgs {
    calendar_id: String,
    start: String,
    end: String,
}

#[derive(Deserialize)]
struct BookAppointmentArgs {
    calendar_id: String,
    summary: String,
    procedure: String,
    start: String,
    end: String,
    description: String,
}

#[derive(Deserialize)]
struct CancelAppointmentArgs {
    calendar_id: String,
    date: String,
    time: Option<String>,
}

const KNOWLEDGE_RESULT_LIMIT: u32 = 3;

/// Executes agent-requested tools against the clinic's collaborators.
/// Every outcome is a string: failures come back as error-describing
/// text so the agent can recover conversationally instead of crashing
/// the turn.
pub struct ToolExecutor {
    pub users: Arc<dyn UserRepository>,
    pub doctors: Arc<dyn DoctorRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub knowledge: Arc<dyn KnowledgeRepository>,
    pub files: Arc<dyn FileRepository>,
    pub gateway: Arc<dyn MessageGateway>,
    pub calendar: Arc<dyn CalendarClient>,
    pub reminders: Arc<dyn ReminderScheduler>,
    pub embeddings: Arc<dyn EmbeddingClient>,
}

impl ToolExecutor {
    pub async fn execute(&self, session: &SessionId, call: &ToolCallRequest) -> String {
        let Some(tool) = ToolId::parse(&call.name) else {
            return format!("Unknown tool `{}`.", call.name);
        };

        info!(
            event_name = "tools.execute",
            tool = tool.as_str(),
            session_id = %session,
            "executing agent tool"
        );

        match tool {
            ToolId::UpdateRegistration => self.update_registration(session, call).await,
            ToolId::CompleteRegistration => self.complete_registration(session).await,
            ToolId::SearchKnowledge => self.search_knowledge(call).await,
            ToolId::SendFile => self.send_file(session, call).await,
            ToolId::ListDoctors => self.list_doctors(call).await,
            ToolId::DoctorDetails => self.doctor_details(call).await,
            ToolId::CheckAvailability => self.check_availability(call).await,
            ToolId::BookAppointment => self.book_appointment(session, call).await,
            ToolId::CancelAppointment => self.cancel_appointment(session, call).await,
        }
    }

    async fn update_registration(&self, session: &SessionId, call: &ToolCallRequest) -> String {
        let args: UpdateRegistrationArgs = match parse_args(call) {
            Ok(args) => args,
            Err(message) => return message,
        };

        let update = UserUpdate {
            full_name: args.full_name,
            document: args.document,
            insurance: args.insurance,
            notes: args.notes,
        };
        if update.is_empty() {
            return "Nothing to update: no profile fields were provided.".to_owned();
        }

        match self.users.update_profile(session, &update).await {
            Ok(()) => "Registration updated successfully.".to_owned(),
            Err(error) => format!("Error updating registration: {error}"),
        }
    }

    async fn complete_registration(&self, session: &SessionId) -> String {
        match self.users.mark_registration_complete(session).await {
            Ok(()) => "Registration finished. The patient can now book appointments.".to_owned(),
            Err(error) => format!("Error finishing registration: {error}"),
        }
    }

    async fn search_knowledge(&self, call: &ToolCallRequest) -> String {
        let args: SearchKnowledgeArgs = match parse_args(call) {
            Ok(args) => args,
            Err(message) => return message,
        };

        let embedding = match self.embeddings.embed(&args.query).await {
            Ok(embedding) => embedding,
            Err(error) => return format!("Error searching the knowledge base: {error}"),
        };

        let chunks = match self
            .knowledge
            .search(&embedding, args.category.as_deref(), KNOWLEDGE_RESULT_LIMIT)
            .await
        {
            Ok(chunks) => chunks,
            Err(error) => return format!("Error searching the knowledge base: {error}"),
        };

        if chunks.is_empty() {
            return "No information found.".to_owned();
        }

        let context = chunks
            .iter()
            .map(|chunk| format!("[{}] {}", chunk.category, chunk.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!("Information found:\n\n{context}")
    }

    async fn send_file(&self, session: &SessionId, call: &ToolCallRequest) -> String {
        let args: SendFileArgs = match parse_args(call) {
            Ok(args) => args,
            Err(message) => return message,
        };

        let file = match self.files.find_by_category(&args.category).await {
            Ok(Some(file)) => file,
            Ok(None) => return format!("File `{}` not found.", args.category),
            Err(error) => return format!("Error looking up the file: {error}"),
        };

        match self.gateway.send_file(session, &file, "").await {
            Ok(_) => format!("File `{}` sent.", file.file_name),
            Err(error) => format!("Error sending the file: {error}"),
        }
    }

    async fn list_doctors(&self, call: &ToolCallRequest) -> String {
        let args: ListDoctorsArgs = match parse_args(call) {
            Ok(args) => args,
            Err(message) => return message,
        };

        let doctors = match self
            .doctors
            .list_available(&args.procedure, args.insurance.as_deref())
            .await
        {
            Ok(doctors) => doctors,
            Err(error) => return format!("Error listing doctors: {error}"),
        };

        if doctors.is_empty() {
            return "No doctor available for this procedure/insurance.".to_owned();
        }

        let listing: Vec<_> = doctors
            .iter()
            .map(|doctor| serde_json::json!({"id": doctor.id.0, "name": doctor.name}))
            .collect();
        serde_json::to_string(&listing).unwrap_or_else(|_| "[]".to_owned())
    }

    async fn doctor_details(&self, call: &ToolCallRequest) -> String {
        let args: DoctorDetailsArgs = match parse_args(call) {
            Ok(args) => args,
            Err(message) => return message,
        };

        let doctor = match self
            .doctors
            .find(&recepta_core::domain::doctor::DoctorId(args.doctor_id.clone()))
            .await
        {
            Ok(Some(doctor)) => doctor,
            Ok(None) => {
                return format!("Doctor with id `{}` not found or inactive.", args.doctor_id)
            }
            Err(error) => return format!("Error fetching doctor details: {error}"),
        };

        serde_json::to_string(&serde_json::json!({
            "id": doctor.id.0,
            "name": doctor.name,
            "calendar_id": doctor.calendar_id,
            "procedures": doctor.procedures,
            "slot_minutes": doctor.slot_minutes,
            "available_weekdays": doctor.available_weekdays,
            "working_hours": doctor.working_hours,
            "insurances": doctor.insurances,
        }))
        .unwrap_or_else(|_| "{}".to_owned())
    }

    async fn check_availability(&self, call: &ToolCallRequest) -> String {
        let args: CheckAvailabilityArgs = match parse_args(call) {
            Ok(args) => args,
            Err(message) => return message,
        };

        let busy = match self
            .calendar
            .busy_between(&args.calendar_id, &args.start, &args.end)
            .await
        {
            Ok(busy) => busy,
            Err(error) => return format!("Error checking the calendar: {error}"),
        };

        if busy.is_empty() {
            return format!(
                "The calendar is completely free between {} and {}.",
                args.start, args.end
            );
        }

        let mut listing = format!("Busy slots ({}):\n", busy.len());
        for slot in busy {
            listing.push_str(&format!("- {}: {} to {}\n", slot.summary, slot.start, slot.end));
        }
        listing
    }

    async fn book_appointment(&self, session: &SessionId, call: &ToolCallRequest) -> String {
        let args: BookAppointmentArgs = match parse_args(call) {
            Ok(args) => args,
            Err(message) => return message,
        };

        let Some(starts_at) = parse_iso(&args.start) else {
            return format!("Invalid start time `{}`: expected ISO 8601.", args.start);
        };
        let Some(ends_at) = parse_iso(&args.end) else {
            return format!("Invalid end time `{}`: expected ISO 8601.", args.end);
        };

        let event = match self
            .calendar
            .create_event(&args.calendar_id, &args.summary, &args.description, &args.start, &args.end)
            .await
        {
            Ok(event) => event,
            Err(error) => return format!("Error booking the appointment: {error}"),
        };

        let doctor = match self.doctors.find_by_calendar(&args.calendar_id).await {
            Ok(doctor) => doctor,
            Err(error) => {
                warn!(
                    event_name = "tools.booking_doctor_lookup_failed",
                    error = %error,
                    "could not resolve doctor for booked calendar"
                );
                None
            }
        };

        let booking = Booking {
            session_id: session.clone(),
            event_id: event.id.clone(),
            summary: event.summary.clone(),
            procedure: args.procedure.clone(),
            doctor_name: doctor.as_ref().map(|d| d.name.clone()).unwrap_or_default(),
            starts_at,
            ends_at,
            description: args.description.clone(),
            created_at: Utc::now(),
        };
        if let Err(error) = self.bookings.save(&booking).await {
            warn!(
                event_name = "tools.booking_record_failed",
                event_id = %event.id,
                error = %error,
                "calendar event created but local booking record failed"
            );
        }

        if let Some(doctor) = &doctor {
            if let Some(doctor_number) = &doctor.contact_number {
                let user = self.users.find(session).await.ok().flatten();
                let notice = BookingNotice {
                    patient_number: session.0.clone(),
                    patient_name: user
                        .as_ref()
                        .and_then(|u| u.full_name.clone())
                        .unwrap_or_else(|| "Not registered".to_owned()),
                    insurance: user
                        .as_ref()
                        .and_then(|u| u.insurance.clone())
                        .unwrap_or_else(|| "Not informed".to_owned()),
                    document: user
                        .as_ref()
                        .and_then(|u| u.document.clone())
                        .unwrap_or_else(|| "No document".to_owned()),
                    procedure: args.procedure.clone(),
                    description: args.description.clone(),
                    doctor_number: doctor_number.clone(),
                    starts_at: event.start.clone(),
                    ends_at: event.end.clone(),
                };
                if let Err(error) = self.gateway.notify_booking(&notice).await {
                    warn!(
                        event_name = "tools.booking_notice_failed",
                        error = %error,
                        "doctor booking notice was not delivered"
                    );
                }
            }
        }

        let reminder = ReminderRequest {
            id: event.id.clone(),
            session_id: session.clone(),
            starts_at,
        };
        if let Err(error) = self.reminders.create(&reminder).await {
            warn!(
                event_name = "tools.reminder_create_failed",
                event_id = %event.id,
                error = %error,
                "booking reminder was not scheduled"
            );
        }

        format!(
            "Appointment booked successfully!\nTitle: {}\nStarts: {}\nEnds: {}\nId: {}",
            event.summary, event.start, event.end, event.id
        )
    }

    async fn cancel_appointment(&self, session: &SessionId, call: &ToolCallRequest) -> String {
        let args: CancelAppointmentArgs = match parse_args(call) {
            Ok(args) => args,
            Err(message) => return message,
        };

        let bookings = match self.bookings.list_for_session(session).await {
            Ok(bookings) => bookings,
            Err(error) => return format!("Error loading appointments: {error}"),
        };

        let on_date: Vec<_> = bookings
            .into_iter()
            .filter(|booking| booking.starts_at.format("%Y-%m-%d").to_string() == args.date)
            .collect();

        if on_date.is_empty() {
            return format!("No appointment found for {}.", args.date);
        }

        let booking = if let Some(time) = &args.time {
            match on_date
                .iter()
                .find(|booking| booking.starts_at.format("%H:%M").to_string() == *time)
            {
                Some(booking) => booking.clone(),
                None => return format!("No appointment found for {} at {}.", args.date, time),
            }
        } else if on_date.len() == 1 {
            on_date[0].clone()
        } else {
            let mut listing = "Found multiple appointments on this date:\n".to_owned();
            for booking in &on_date {
                listing.push_str(&format!(
                    "- {} at {}\n",
                    booking.summary,
                    booking.starts_at.format("%H:%M")
                ));
            }
            listing.push_str("\nPlease specify the time.");
            return listing;
        };

        if let Err(error) = self.calendar.delete_event(&args.calendar_id, &booking.event_id).await {
            return format!("Error cancelling the appointment: {error}");
        }

        if let Err(error) = self.bookings.delete(session, &booking.event_id).await {
            warn!(
                event_name = "tools.booking_delete_failed",
                event_id = %booking.event_id,
                error = %error,
                "calendar event removed but local booking record remains"
            );
        }

        if let Err(error) = self.reminders.delete(&booking.event_id).await {
            warn!(
                event_name = "tools.reminder_delete_failed",
                event_id = %booking.event_id,
                error = %error,
                "booking reminder was not removed"
            );
        }

        format!(
            "Appointment cancelled successfully!\nTitle: {}\nWas scheduled for: {}",
            booking.summary,
            booking.starts_at.format("%Y-%m-%d %H:%M")
        )
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(call: &ToolCallRequest) -> Result<T, String> {
    serde_json::from_value(call.arguments.clone())
        .map_err(|error| format!("Invalid arguments for `{}`: {error}", call.name))
}

fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|timestamp| timestamp.with_timezone(&Utc))
}
