//! Extraction of identifiers from `pdptool` output.
//!
//! The tool prints human-oriented text, so everything here is pattern based. All
//! knowledge of that text format lives in this module.

use std::sync::LazyLock;

use regex::Regex;

static CID_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(baga[a-zA-Z0-9]+)(?::(baga[a-zA-Z0-9]+))?$").expect("valid CID regex")
});
static TX_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Transaction Status:[ \t]*(confirmed|pending|failed)").expect("valid regex")
});
static TX_SUCCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Transaction Successful:[ \t]*(true|false|Pending)").expect("valid regex")
});
static PROOF_SET_CREATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Proofset Created:[ \t]*(true|false)").expect("valid regex"));
static PROOF_SET_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ProofSet ID:[ \t]*(\d+)").expect("valid regex"));
static CREATION_TX_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Location: /pdp/proof-sets/created/(0x[a-fA-F0-9]{64})").expect("valid regex")
});

const ROOT_ID_LABEL: &str = "Root ID:";
const ROOT_CID_LABEL: &str = "Root CID:";
const ROOTS_HEADER: &str = "Roots:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// A line matched the CID grammar.
    Matched,
    /// No line matched; the last non-blank line was used instead.
    Fallback,
}

/// A content identifier recovered from `upload-file` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCid {
    /// The full `base[:sub]` string passed to `add-roots`.
    pub compound: String,
    pub base: String,
    pub sub: String,
    pub confidence: Confidence,
}

/// Find the content identifier in tool output, scanning from the last line up.
///
/// Returns `None` only when the output has no non-blank line at all.
pub fn extract_cid(output: &str) -> Option<ExtractedCid> {
    let lines: Vec<&str> = output.lines().map(str::trim).collect();

    for line in lines.iter().rev() {
        if let Some(caps) = CID_LINE.captures(line) {
            let base = caps[1].to_string();
            let sub = caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| base.clone());
            return Some(ExtractedCid {
                compound: line.to_string(),
                base,
                sub,
                confidence: Confidence::Matched,
            });
        }
    }

    let last = lines.iter().rev().find(|line| !line.is_empty())?;
    let base = last.split(':').next().unwrap_or(last).to_string();
    Some(ExtractedCid {
        compound: last.to_string(),
        sub: base.clone(),
        base,
        confidence: Confidence::Fallback,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Confirmed,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxSuccess {
    True,
    False,
    Pending,
}

/// Fields reported by `get-proof-set-create-status`. Missing fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStatus {
    pub status: Option<TxState>,
    pub success: Option<TxSuccess>,
    pub created: Option<bool>,
    pub proof_set_id: Option<String>,
}

impl TransactionStatus {
    /// The transaction is mined and the proof set exists with a known id.
    pub fn is_created(&self) -> bool {
        self.status == Some(TxState::Confirmed)
            && self.success == Some(TxSuccess::True)
            && self.created == Some(true)
            && self.proof_set_id.is_some()
    }

    /// The remote side reported a state that will not resolve on its own.
    pub fn is_failed(&self) -> bool {
        self.status == Some(TxState::Failed)
            || (self.status == Some(TxState::Confirmed) && self.success == Some(TxSuccess::False))
    }
}

pub fn extract_transaction_status(text: &str) -> TransactionStatus {
    let status = TX_STATUS.captures(text).map(|c| match &c[1] {
        "confirmed" => TxState::Confirmed,
        "failed" => TxState::Failed,
        _ => TxState::Pending,
    });
    let success = TX_SUCCESS.captures(text).map(|c| match &c[1] {
        "true" => TxSuccess::True,
        "false" => TxSuccess::False,
        _ => TxSuccess::Pending,
    });
    let created = PROOF_SET_CREATED.captures(text).map(|c| &c[1] == "true");

    TransactionStatus {
        status,
        success,
        created,
        proof_set_id: extract_proof_set_id(text),
    }
}

pub fn extract_proof_set_id(text: &str) -> Option<String> {
    PROOF_SET_ID.captures(text).map(|c| c[1].to_string())
}

/// Transaction hash from the `Location:` header echoed by `create-proof-set`.
pub fn extract_creation_tx_hash(text: &str) -> Option<String> {
    CREATION_TX_HASH.captures(text).map(|c| c[1].to_string())
}

/// Result of scanning `get-proof-set` output for one root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingScan {
    pub record_id: Option<u64>,
    /// At least one `Root ID:` line was present.
    pub saw_any_record: bool,
    /// A `Roots:` header was printed without any entries under it.
    pub roots_pending: bool,
}

/// Walk a proof-set listing and find the numeric root id whose CID equals `target_cid`.
///
/// A `Root CID:` line only counts when a valid numeric `Root ID:` came right before it.
pub fn extract_numeric_record_id(listing: &str, target_cid: &str) -> Option<u64> {
    scan_listing(listing, target_cid).record_id
}

pub fn scan_listing(listing: &str, target_cid: &str) -> ListingScan {
    let mut last_seen: Option<u64> = None;
    let mut saw_any_record = false;

    for line in listing.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix(ROOT_ID_LABEL) {
            saw_any_record = true;
            last_seen = value.trim().parse::<u64>().ok();
        } else if let Some(value) = line.strip_prefix(ROOT_CID_LABEL) {
            if value.trim() == target_cid {
                if let Some(id) = last_seen {
                    return ListingScan {
                        record_id: Some(id),
                        saw_any_record,
                        roots_pending: false,
                    };
                }
                tracing::warn!(cid = target_cid, "Matched root CID without a numeric root id");
            }
            last_seen = None;
        }
    }

    ListingScan {
        record_id: None,
        saw_any_record,
        roots_pending: listing.contains(ROOTS_HEADER) && !saw_any_record,
    }
}
