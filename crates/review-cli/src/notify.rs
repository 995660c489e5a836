use review_core::review_contracts::ProposalMessage;
use review_core::{Proposal, Speaker};
use review_engine::Notifier;
use tracing::info;

/// Emits one structured event per speaker notification. Mail delivery is
/// expected to be driven from the log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn proposal_message(&self, speaker: &Speaker, proposal: &Proposal, message: &ProposalMessage) {
        info!(
            event = "speaker_notified",
            template = "proposal_new_message",
            proposal_id = proposal.id,
            message_id = message.message_id,
            speaker = %speaker.user_id,
            email = speaker.email.as_deref().unwrap_or("")
        );
    }
}
