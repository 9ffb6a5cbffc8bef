//! Channel signal-type inference
//!
//! Channel labels follow the clinical `<lead><contact>` convention (`LA01`,
//! `Fp1`, `ECG2`). The lead prefix decides the signal type, except for
//! depth/grid leads: whether those are ECoG grids or SEEG shafts can only be
//! told after every channel has been seen, by counting them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of unresolved leads above which they are treated as ECoG
pub const DEFAULT_CHANNEL_TYPE_THRESHOLD: usize = 15;

/// Leading non-digit label followed by a contact number, anchored at the start
static LEAD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\D+)(\d+)").expect("hardcoded pattern is valid"));

/// Scalp electrode lead prefixes (10-20 system)
const SCALP_LEADS: &[&str] = &["c", "cz", "f", "fp", "fz", "o", "p", "pz", "t"];

/// Cardiac lead prefixes
const CARDIAC_LEADS: &[&str] = &["ecg", "ekg"];

/// Signal type of a recording channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Electrocardiogram
    Ecg,
    /// Scalp EEG
    Eeg,
    /// Dense electrode grid (electrocorticography)
    Ecog,
    /// Stereo-EEG depth electrodes
    Seeg,
    /// Anything that does not follow the lead/contact pattern
    Misc,
}

impl ChannelType {
    /// BIDS channel type label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ecg => "ECG",
            Self::Eeg => "EEG",
            Self::Ecog => "ECOG",
            Self::Seeg => "SEEG",
            Self::Misc => "MISC",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel label split into lead and contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadContact {
    /// Non-digit lead prefix as written
    pub lead: String,
    /// Contact number digits as written
    pub contact: String,
}

/// Split a channel name into lead and contact; `None` if the name does not
/// start with a non-digit label followed by digits
pub fn split_lead_contact(name: &str) -> Option<LeadContact> {
    let caps = LEAD_PATTERN.captures(name)?;
    let lead = caps.get(1)?.as_str().to_string();
    let contact = caps.get(2)?.as_str().to_string();
    Some(LeadContact { lead, contact })
}

enum Pending {
    Resolved(ChannelType),
    RemainingLead,
}

fn classify_one(name: &str) -> Pending {
    let Some(parsed) = split_lead_contact(name) else {
        return Pending::Resolved(ChannelType::Misc);
    };

    let lead = parsed.lead.to_lowercase();
    if CARDIAC_LEADS.contains(&lead.as_str()) {
        Pending::Resolved(ChannelType::Ecg)
    } else if SCALP_LEADS.contains(&lead.as_str()) {
        Pending::Resolved(ChannelType::Eeg)
    } else {
        Pending::RemainingLead
    }
}

/// Infer a signal type for every channel, in input order
///
/// Channels whose lead is neither cardiac nor scalp are collected first and
/// resolved together: more than `threshold` of them means ECoG, otherwise SEEG.
///
/// # Examples
///
/// ```
/// use ieeg_bids_downloader::channels::infer_channel_types;
/// use ieeg_bids_downloader::ChannelType;
///
/// let types = infer_channel_types(&["Fp1", "Fp2", "ECG1"], 15);
/// assert_eq!(types, vec![ChannelType::Eeg, ChannelType::Eeg, ChannelType::Ecg]);
/// ```
pub fn infer_channel_types<S: AsRef<str>>(names: &[S], threshold: usize) -> Vec<ChannelType> {
    let pending: Vec<Pending> = names.iter().map(|n| classify_one(n.as_ref())).collect();

    let remaining = pending
        .iter()
        .filter(|p| matches!(p, Pending::RemainingLead))
        .count();
    let remaining_type = if remaining > threshold {
        ChannelType::Ecog
    } else {
        ChannelType::Seeg
    };

    pending
        .into_iter()
        .map(|p| match p {
            Pending::Resolved(t) => t,
            Pending::RemainingLead => remaining_type,
        })
        .collect()
}
