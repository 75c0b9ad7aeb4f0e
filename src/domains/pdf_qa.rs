//! Document question answering: retrieval only, no tools

use super::DomainProfile;
use crate::prompt::Persona;
use crate::tools::ToolRegistry;

const PERSONA: &str = "Answer questions using the retrieved document excerpts. \
Cite the excerpt number you relied on, e.g. [2]. If the excerpts do not contain the answer, say so plainly \
instead of guessing.";

pub const COLLECTION: &str = "pdf_documents";

pub fn profile() -> DomainProfile {
    DomainProfile {
        kind: "pdf_qa".to_string(),
        persona: Persona::new("Doc, a document research assistant", PERSONA),
        domain_knowledge: String::new(),
        registry: ToolRegistry::new(),
        collection: Some(COLLECTION.to_string()),
    }
}
