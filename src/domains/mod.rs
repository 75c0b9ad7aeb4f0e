//! Assistant domains
//!
//! The engine is generic; a domain contributes persona text, a block of static
//! knowledge, a tool registry and (optionally) a vector-index collection.

pub mod astrology;
pub mod ecommerce;
pub mod finance;
pub mod hr;
pub mod pdf_qa;

use crate::prompt::Persona;
use crate::tools::ToolRegistry;

pub const KINDS: [&str; 5] = ["finance", "hr", "astrology", "pdf_qa", "ecommerce"];

#[derive(Clone)]
pub struct DomainProfile {
    /// Session kind tag, also the URL segment of the HTTP surface
    pub kind: String,
    pub persona: Persona,
    pub domain_knowledge: String,
    pub registry: ToolRegistry,
    /// Vector-index collection searched on every turn
    pub collection: Option<String>,
}

/// Build the profile for one kind. Each call creates fresh domain records.
pub fn profile_for(kind: &str) -> Option<DomainProfile> {
    match kind {
        "finance" => Some(finance::profile()),
        "hr" => Some(hr::profile()),
        "astrology" => Some(astrology::profile()),
        "pdf_qa" => Some(pdf_qa::profile()),
        "ecommerce" => Some(ecommerce::profile()),
        _ => None,
    }
}

pub fn all_profiles() -> Vec<DomainProfile> {
    KINDS.iter().filter_map(|kind| profile_for(kind)).collect()
}

/// Whole amounts print without decimals ("100"), others with two ("12.50").
pub(crate) fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{:.0}", amount)
    } else {
        format!("{:.2}", amount)
    }
}
