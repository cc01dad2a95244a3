use chrono::{DateTime, Datelike, Duration, Utc};

use recepta_core::config::AgentConfig;
use recepta_core::domain::message::AgentStage;
use recepta_core::domain::user::SessionId;

/// Assembles the system instructions for one stage invocation: the
/// configured prompt, the current date/time, the sender identity, and
/// (for scheduling) a rolling weekday calendar so the model can resolve
/// "next Tuesday" without date arithmetic.
pub fn stage_instructions(
    config: &AgentConfig,
    stage: AgentStage,
    session: &SessionId,
    now: DateTime<Utc>,
) -> String {
    let base = match stage {
        AgentStage::Receptionist => &config.receptionist_prompt,
        AgentStage::Orchestrator => &config.orchestrator_prompt,
        AgentStage::Rag => &config.rag_prompt,
        AgentStage::Scheduling => &config.scheduling_prompt,
    };

    let mut instructions = format!(
        "{base}\n\nCURRENT DATE/TIME: {timestamp} | {weekday}\n",
        timestamp = now.format("%Y-%m-%d %H:%M:%S"),
        weekday = weekday_name(now),
    );

    if stage == AgentStage::Scheduling {
        instructions.push_str(&format!(
            "CALENDAR for the next {CALENDAR_DAYS} days: {calendar}\n\
             IMPORTANT: use the calendar above to resolve weekdays.\n",
            calendar = rolling_calendar(now),
        ));
    }

    instructions.push_str(&format!(
        "IMPORTANT: the sender's number is {session}. Always pass this number to tools."
    ));

    instructions
}

pub const CALENDAR_DAYS: i64 = 31;

fn weekday_name(date: DateTime<Utc>) -> &'static str {
    match date.weekday() {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}

fn rolling_calendar(now: DateTime<Utc>) -> String {
    (0..CALENDAR_DAYS)
        .map(|offset| {
            let date = now + Duration::days(offset);
            format!("{} ({})", date.format("%d/%m"), weekday_name(date))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use recepta_core::config::AppConfig;
    use recepta_core::domain::message::AgentStage;
    use recepta_core::domain::user::SessionId;

    use super::{rolling_calendar, stage_instructions, CALENDAR_DAYS};

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    #[test]
    fn calendar_covers_the_whole_window_starting_today() {
        let now = parse_ts("2026-08-06T10:00:00Z");
        let calendar = rolling_calendar(now);
        let entries: Vec<_> = calendar.split(" | ").collect();
        assert_eq!(entries.len() as i64, CALENDAR_DAYS);
        assert_eq!(entries[0], "06/08 (Thursday)");
        assert_eq!(entries[1], "07/08 (Friday)");
    }

    #[test]
    fn scheduling_instructions_include_calendar_and_sender() {
        let config = AppConfig::default().agent;
        let session = SessionId("5599000011122".to_owned());
        let now = parse_ts("2026-08-06T10:00:00Z");

        let scheduling =
            stage_instructions(&config, AgentStage::Scheduling, &session, now);
        assert!(scheduling.contains("CALENDAR for the next 31 days"));
        assert!(scheduling.contains("5599000011122"));
        assert!(scheduling.contains("2026-08-06 10:00:00 | Thursday"));

        let receptionist =
            stage_instructions(&config, AgentStage::Receptionist, &session, now);
        assert!(!receptionist.contains("CALENDAR for the next"));
        assert!(receptionist.contains("5599000011122"));
    }
}
