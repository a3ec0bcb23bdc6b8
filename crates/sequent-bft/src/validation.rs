//! Signature-check resolution for inbound PBFT messages.
//!
//! Parsing is pure and happens at the network edge; this module decides what
//! must be verified before a parsed message may be applied. Verification
//! itself is delegated work: the state machine resolves keys and canonical
//! bytes here, and the runner runs the batch off the actor thread.

use sequent_core::SignatureCheck;
use sequent_types::{OrderingTopology, PbftMessage, PeerId, Prepare, PrePrepare, ViewChange};

/// Resolution failure: some signer is not in the epoch's topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSigner(pub PeerId);

/// Collect every signature the message carries, envelope and nested alike.
///
/// A view change embeds the prepared certificate's pre-prepare and prepares;
/// a new view embeds a quorum of view changes plus its pre-prepare. All of
/// them are attacker-controlled input and must verify under the keys the
/// topology binds for this epoch.
pub fn signature_checks(
    message: &PbftMessage,
    topology: &OrderingTopology,
) -> Result<Vec<SignatureCheck>, UnknownSigner> {
    let mut checks = Vec::new();
    collect_envelope(message, topology, &mut checks)?;
    match message {
        PbftMessage::PrePrepare(_) | PbftMessage::Prepare(_) | PbftMessage::Commit(_) => {}
        PbftMessage::ViewChange(vc) => collect_view_change(vc, topology, &mut checks)?,
        PbftMessage::NewView(nv) => {
            for vc in &nv.view_changes {
                collect_envelope(
                    &PbftMessage::ViewChange(vc.clone()),
                    topology,
                    &mut checks,
                )?;
                collect_view_change(vc, topology, &mut checks)?;
            }
            collect_pre_prepare(&nv.pre_prepare, topology, &mut checks)?;
        }
    }
    Ok(checks)
}

fn collect_view_change(
    vc: &ViewChange,
    topology: &OrderingTopology,
    checks: &mut Vec<SignatureCheck>,
) -> Result<(), UnknownSigner> {
    if let Some(prepared) = &vc.prepared {
        collect_pre_prepare(&prepared.pre_prepare, topology, checks)?;
        for prepare in &prepared.prepares {
            collect_prepare(prepare, topology, checks)?;
        }
    }
    Ok(())
}

fn collect_envelope(
    message: &PbftMessage,
    topology: &OrderingTopology,
    checks: &mut Vec<SignatureCheck>,
) -> Result<(), UnknownSigner> {
    let key = topology
        .public_key(message.sender())
        .ok_or_else(|| UnknownSigner(message.sender().clone()))?;
    checks.push(SignatureCheck {
        public_key: key,
        message: message.signing_bytes(),
        signature: *message.signature(),
    });
    Ok(())
}

fn collect_pre_prepare(
    pp: &PrePrepare,
    topology: &OrderingTopology,
    checks: &mut Vec<SignatureCheck>,
) -> Result<(), UnknownSigner> {
    let key = topology
        .public_key(&pp.sender)
        .ok_or_else(|| UnknownSigner(pp.sender.clone()))?;
    checks.push(SignatureCheck {
        public_key: key,
        message: pp.signing_bytes(),
        signature: pp.signature,
    });
    Ok(())
}

fn collect_prepare(
    prepare: &Prepare,
    topology: &OrderingTopology,
    checks: &mut Vec<SignatureCheck>,
) -> Result<(), UnknownSigner> {
    let key = topology
        .public_key(&prepare.sender)
        .ok_or_else(|| UnknownSigner(prepare.sender.clone()))?;
    checks.push(SignatureCheck {
        public_key: key,
        message: prepare.signing_bytes(),
        signature: prepare.signature,
    });
    Ok(())
}
