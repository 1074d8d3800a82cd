use serde::{Deserialize, Serialize};

/// Named document corpora, each stored under `<data_dir>/<dir_name>/<split>.jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corpus {
    /// Large-scale scanned document collection used for self-supervised tasks.
    IitCdip,
    PubLayNet,
    DocBank,
    WebSrc,
    VisualMrc,
    /// Document understanding benchmark collection.
    Due,
}

impl Corpus {
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::IitCdip => "iit-cdip",
            Self::PubLayNet => "publaynet",
            Self::DocBank => "docbank",
            Self::WebSrc => "websrc",
            Self::VisualMrc => "visualmrc",
            Self::Due => "due",
        }
    }
}

impl std::fmt::Display for Corpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// What a dataset teaches the model; decides how records become examples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Predict the boxes of spans whose text is given.
    LayoutModeling,
    /// Predict both text and boxes of masked spans.
    TextAndLayoutReconstruction,
    /// Predict the text of spans whose boxes are given.
    VisualTextRecognition,
    /// Predict the boxes of all regions with a given label.
    LayoutAnalysis,
    /// Predict labeled entity spans.
    InformationExtraction,
    QuestionAnswering,
    /// Benchmark-style question answering over the whole document.
    DocumentUnderstanding,
}

impl Task {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LayoutModeling => "layout_modeling",
            Self::TextAndLayoutReconstruction => "text_and_layout_reconstruction",
            Self::VisualTextRecognition => "visual_text_recognition",
            Self::LayoutAnalysis => "layout",
            Self::InformationExtraction => "ie",
            Self::QuestionAnswering => "qa",
            Self::DocumentUnderstanding => "due",
        }
    }

    /// Instruction text prepended to every input of the task.
    #[must_use]
    pub fn prompt(self) -> &'static str {
        match self {
            Self::LayoutModeling => "Layout Modeling.",
            Self::TextAndLayoutReconstruction => "Joint Text-Layout Reconstruction.",
            Self::VisualTextRecognition => "Visual Text Recognition.",
            Self::LayoutAnalysis => "Layout Analysis.",
            Self::InformationExtraction => "Information Extraction.",
            Self::QuestionAnswering => "Question Answering.",
            Self::DocumentUnderstanding => "Document Understanding.",
        }
    }

    #[must_use]
    pub fn is_self_supervised(self) -> bool {
        matches!(
            self,
            Self::LayoutModeling | Self::TextAndLayoutReconstruction | Self::VisualTextRecognition
        )
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Dev,
}

impl Split {
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Train => "train.jsonl",
            Self::Dev => "dev.jsonl",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Train => f.write_str("train"),
            Self::Dev => f.write_str("dev"),
        }
    }
}
