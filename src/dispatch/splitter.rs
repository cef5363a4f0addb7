//! Split raw agent output into the customer-facing reply and the internal
//! diagnostic trace.
//!
//! The agent is prompted to close its answer with a marker phrase followed by
//! the SQL statement or tool name it used. Customers never see that section;
//! it is persisted on the task for operator review.

/// One marker phrase the splitter scans for, with the label its trailing text
/// is filed under.
#[derive(Debug, Clone, Copy)]
pub struct Marker {
    pub literal: &'static str,
    pub label: &'static str,
}

/// Marker vocabulary, in priority order. Bold variants come before their
/// plain forms so the plain form cannot match inside the bold one.
pub const DEFAULT_MARKERS: &[Marker] = &[
    Marker { literal: "**คำสั่ง SQL ที่ใช้:**", label: "SQL" },
    Marker { literal: "**SQL command used:**", label: "SQL" },
    Marker { literal: "คำสั่ง SQL ที่ใช้:", label: "SQL" },
    Marker { literal: "SQL command used:", label: "SQL" },
    Marker { literal: "**Tool ที่ใช้:**", label: "Tool" },
    Marker { literal: "**Tool used:**", label: "Tool" },
    Marker { literal: "Tool ที่ใช้:", label: "Tool" },
    Marker { literal: "Tool used:", label: "Tool" },
];

/// A raw agent response partitioned into its two destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitResponse {
    pub customer_message: String,
    pub trace: Option<String>,
}

/// Partition `raw` at the first marker (by priority) that has non-empty text
/// after it. Without such a marker the whole trimmed text is the customer
/// message and there is no trace.
pub fn split(raw: &str, markers: &[Marker]) -> SplitResponse {
    for marker in markers {
        if let Some(index) = raw.find(marker.literal) {
            let after = raw[index + marker.literal.len()..].trim();
            // A marker with nothing behind it carries no trace; leave the
            // text alone and let a lower-priority marker have a go.
            if after.is_empty() {
                continue;
            }
            return SplitResponse {
                customer_message: raw[..index].trim().to_string(),
                trace: Some(format!("{}: {}", marker.label, after)),
            };
        }
    }

    SplitResponse {
        customer_message: raw.trim().to_string(),
        trace: None,
    }
}
