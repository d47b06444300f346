use std::fmt;

/// Lifecycle of a submission status row.
///
/// A row is created as `InQueue` when the submission is accepted onto the
/// queue. Exactly one worker moves it to `Processing`, and from there it
/// reaches one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionStatus {
    InQueue,
    Processing,
    Accepted,
    Rejected,
    Error,
}

impl SubmissionStatus {
    pub fn code(self) -> &'static str {
        match self {
            SubmissionStatus::InQueue => "S1",
            SubmissionStatus::Processing => "S2",
            SubmissionStatus::Accepted => "S3",
            SubmissionStatus::Rejected => "S4",
            SubmissionStatus::Error => "SE",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SubmissionStatus::InQueue => "In queue",
            SubmissionStatus::Processing => "Processing",
            SubmissionStatus::Accepted => "Passed validation",
            SubmissionStatus::Rejected => "Rejected",
            SubmissionStatus::Error => "Error",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "S1" => Some(SubmissionStatus::InQueue),
            "S2" => Some(SubmissionStatus::Processing),
            "S3" => Some(SubmissionStatus::Accepted),
            "S4" => Some(SubmissionStatus::Rejected),
            "SE" => Some(SubmissionStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Accepted | SubmissionStatus::Rejected | SubmissionStatus::Error
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code(), self.label())
    }
}

/// Downstream data-processing state carried on the status row. Submissions
/// handled by this pipeline are not forwarded for further processing, so
/// they always end up `NotApplicable`, but the full code set is kept for the
/// shared table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataProcessingStatus {
    NotApplicable,
    InQueue,
    Processing,
    ProcessedWithErrors,
    ProcessedSuccessfully,
    Error,
}

impl DataProcessingStatus {
    pub fn code(self) -> &'static str {
        match self {
            DataProcessingStatus::NotApplicable => "DP0",
            DataProcessingStatus::InQueue => "DP1",
            DataProcessingStatus::Processing => "DP2",
            DataProcessingStatus::ProcessedWithErrors => "DP3",
            DataProcessingStatus::ProcessedSuccessfully => "DP4",
            DataProcessingStatus::Error => "DPE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "DP0" => Some(DataProcessingStatus::NotApplicable),
            "DP1" => Some(DataProcessingStatus::InQueue),
            "DP2" => Some(DataProcessingStatus::Processing),
            "DP3" => Some(DataProcessingStatus::ProcessedWithErrors),
            "DP4" => Some(DataProcessingStatus::ProcessedSuccessfully),
            "DPE" => Some(DataProcessingStatus::Error),
            _ => None,
        }
    }
}

/// State of an archived report record. A newly committed record is either
/// `Accepted` or `Rejected`; an earlier accepted record for the same
/// version, bank and period is flipped to `Resubmitted` when a new accepted
/// submission supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchivedReportStatus {
    Accepted,
    Rejected,
    Resubmitted,
}

impl ArchivedReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ArchivedReportStatus::Accepted => "Accepted",
            ArchivedReportStatus::Rejected => "Rejected",
            ArchivedReportStatus::Resubmitted => "Resubmitted",
        }
    }
}
