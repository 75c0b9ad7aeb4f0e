//! Astrology assistant backed by a static zodiac table

use super::DomainProfile;
use crate::error::EngineError;
use crate::prompt::Persona;
use crate::tools::{ensure_object, require_number, Tool, ToolContext, ToolRegistry};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;

const PERSONA: &str = "Answer questions about zodiac signs, their traits and compatibility in a warm, light tone. \
When the user gives a birth date, look the sign up with the tool instead of guessing. \
Make clear that astrology is for entertainment.";

const MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

pub struct ZodiacSign {
    pub name: &'static str,
    pub element: &'static str,
    /// (month, day) of the first day, inclusive
    pub starts: (u32, u32),
    /// (month, day) of the last day, inclusive
    pub ends: (u32, u32),
}

pub const ZODIAC: [ZodiacSign; 12] = [
    ZodiacSign { name: "Aries", element: "Fire", starts: (3, 21), ends: (4, 19) },
    ZodiacSign { name: "Taurus", element: "Earth", starts: (4, 20), ends: (5, 20) },
    ZodiacSign { name: "Gemini", element: "Air", starts: (5, 21), ends: (6, 20) },
    ZodiacSign { name: "Cancer", element: "Water", starts: (6, 21), ends: (7, 22) },
    ZodiacSign { name: "Leo", element: "Fire", starts: (7, 23), ends: (8, 22) },
    ZodiacSign { name: "Virgo", element: "Earth", starts: (8, 23), ends: (9, 22) },
    ZodiacSign { name: "Libra", element: "Air", starts: (9, 23), ends: (10, 22) },
    ZodiacSign { name: "Scorpio", element: "Water", starts: (10, 23), ends: (11, 21) },
    ZodiacSign { name: "Sagittarius", element: "Fire", starts: (11, 22), ends: (12, 21) },
    ZodiacSign { name: "Capricorn", element: "Earth", starts: (12, 22), ends: (1, 19) },
    ZodiacSign { name: "Aquarius", element: "Air", starts: (1, 20), ends: (2, 18) },
    ZodiacSign { name: "Pisces", element: "Water", starts: (2, 19), ends: (3, 20) },
];

impl ZodiacSign {
    fn range(&self) -> String {
        format!(
            "{} {} - {} {}",
            MONTHS[self.starts.0 as usize - 1],
            self.starts.1,
            MONTHS[self.ends.0 as usize - 1],
            self.ends.1
        )
    }
}

/// Every sign spans exactly two calendar months.
pub fn sign_for(month: u32, day: u32) -> Option<&'static ZodiacSign> {
    ZODIAC.iter().find(|sign| {
        (month == sign.starts.0 && day >= sign.starts.1) || (month == sign.ends.0 && day <= sign.ends.1)
    })
}

fn days_in_month(month: u32) -> u32 {
    match month {
        2 => 29,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn knowledge() -> String {
    let mut table = String::from("Zodiac table (sign, element, dates):\n");
    for sign in &ZODIAC {
        table.push_str(&format!("- {}, {}, {}\n", sign.name, sign.element, sign.range()));
    }
    table
}

pub fn profile() -> DomainProfile {
    DomainProfile {
        kind: "astrology".to_string(),
        persona: Persona::new("Stella, an astrology guide", PERSONA),
        domain_knowledge: knowledge(),
        registry: ToolRegistry::new().with(Arc::new(GetZodiacSignTool)),
        collection: Some("astrology_readings".to_string()),
    }
}

/// Month as a number (3, "3") or an English name or abbreviation ("March", "mar")
fn month_arg(args: &Value) -> Result<u32> {
    if let Some(name) = args.get("month").and_then(Value::as_str) {
        let lower = name.trim().to_lowercase();
        if lower.len() >= 3 {
            if let Some(pos) = MONTHS.iter().position(|m| m.to_lowercase().starts_with(&lower)) {
                return Ok(pos as u32 + 1);
            }
        }
    }

    let month = require_number(args, "month")?;
    if month.fract() != 0.0 || !(1.0..=12.0).contains(&month) {
        return Err(EngineError::InvalidToolInput(
            "'month' must be between 1 and 12".to_string(),
        ));
    }
    Ok(month as u32)
}

pub struct GetZodiacSignTool;

#[async_trait::async_trait]
impl Tool for GetZodiacSignTool {
    fn name(&self) -> &'static str {
        "getZodiacSign"
    }

    fn description(&self) -> &'static str {
        "Look up the zodiac sign for a birth month and day"
    }

    fn usage(&self) -> &'static str {
        r#"{"month": 3, "day": 21}"#
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> Result<Value> {
        ensure_object(args)?;
        let month = month_arg(args)?;
        let day = require_number(args, "day")?;
        if day.fract() != 0.0 || day < 1.0 || day > days_in_month(month) as f64 {
            return Err(EngineError::InvalidToolInput(format!(
                "'day' must be between 1 and {} for {}",
                days_in_month(month),
                MONTHS[month as usize - 1]
            )));
        }

        let sign = sign_for(month, day as u32).ok_or_else(|| {
            EngineError::ToolExecutionError(format!("no sign covers {}/{}", month, day))
        })?;

        Ok(json!({
            "sign": sign.name,
            "element": sign.element,
            "dates": sign.range(),
        }))
    }
}
