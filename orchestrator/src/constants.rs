pub const KEY_NAMESPACE: &str = "workless";

pub const DEFAULT_WORKER_ID_PREFIX: &str = "workless_worker_";

pub fn pending_queue_key(queue_name: &str) -> String {
    format!("{KEY_NAMESPACE}:pending:{queue_name}")
}

pub fn processing_queue_key(queue_name: &str) -> String {
    format!("{KEY_NAMESPACE}:processing:{queue_name}")
}

pub fn dead_letter_queue_key(queue_name: &str) -> String {
    format!("{KEY_NAMESPACE}:dead:{queue_name}")
}

pub fn job_key(queue_name: &str, job_id: &str) -> String {
    format!("{KEY_NAMESPACE}:{queue_name}:jobs:{job_id}")
}

pub fn job_lock_key(queue_name: &str, job_id: &str) -> String {
    format!("{KEY_NAMESPACE}:{queue_name}:locks:{job_id}")
}

/// The three lists a job id can live in, used by inspection commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueList {
    Pending,
    Processing,
    Dead,
}

impl QueueList {
    pub fn key(self, queue_name: &str) -> String {
        match self {
            QueueList::Pending => pending_queue_key(queue_name),
            QueueList::Processing => processing_queue_key(queue_name),
            QueueList::Dead => dead_letter_queue_key(queue_name),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueList::Pending => "pending",
            QueueList::Processing => "processing",
            QueueList::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(QueueList::Pending),
            "processing" => Some(QueueList::Processing),
            "dead" | "dlq" => Some(QueueList::Dead),
            _ => None,
        }
    }
}
