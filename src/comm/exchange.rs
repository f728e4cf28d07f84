//! Collectives for pattern assembly, built from `isend`/`irecv`.
//!
//! Two primitives are provided: an all-gather of one count per rank (used to
//! derive ownership ranges when an index map is constructed) and a
//! variable-length all-to-all of [`WireEntry`] buffers (used by the finalize
//! step). Both run in stages -- counts first, payloads second -- and both
//! drain every outstanding send/receive handle before returning, even when a
//! neighbor fails.
//!
//! Inbound data is aggregated in rank order, so the result is deterministic
//! regardless of message arrival order.

use crate::comm::communicator::{CommTag, Communicator, Wait};
use crate::comm::wire::{WireCount, WireEntry, cast_slice};
use crate::error::SparsityError;

fn comm_err(neighbor: usize, detail: String) -> SparsityError {
    SparsityError::CommError { neighbor, detail }
}

/// Gather one `u64` from every rank; result is indexed by rank.
pub fn all_gather_counts<C: Communicator>(
    comm: &C,
    tag: CommTag,
    value: u64,
) -> Result<Vec<u64>, SparsityError> {
    let n = comm.size();
    let me = comm.rank();
    if n == 1 {
        return Ok(vec![value]);
    }

    // 1) post all receives
    let mut pending_recvs = Vec::with_capacity(n - 1);
    for peer in (0..n).filter(|&p| p != me) {
        let mut buf = [0u8; 8];
        let h = comm.irecv(peer, tag.base(), &mut buf);
        pending_recvs.push((peer, h));
    }

    // 2) post all sends; the count buffer must stay alive until completion
    let count = WireCount::new(value as usize);
    let mut pending_sends = Vec::with_capacity(n - 1);
    for peer in (0..n).filter(|&p| p != me) {
        pending_sends.push(comm.isend(peer, tag.base(), cast_slice(std::slice::from_ref(&count))));
    }

    // 3) wait for all recvs, collecting counts without early return
    let mut gathered = vec![0u64; n];
    gathered[me] = value;
    let mut maybe_err = None;
    for (peer, h) in pending_recvs {
        match h.wait() {
            Some(data) if data.len() == 8 => {
                let counts: Vec<WireCount> = bytemuck::pod_collect_to_vec(&data);
                gathered[peer] = counts[0].get() as u64;
            }
            Some(data) => {
                if maybe_err.is_none() {
                    maybe_err = Some(comm_err(
                        peer,
                        format!("expected 8 bytes for count header, got {}", data.len()),
                    ));
                }
            }
            None => {
                if maybe_err.is_none() {
                    maybe_err = Some(comm_err(peer, format!("failed to receive count from rank {peer}")));
                }
            }
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(gathered),
    }
}

/// Variable-length all-to-all: one outgoing entry buffer per destination
/// rank, one aggregated inbound buffer back. Stage 1 exchanges entry counts
/// with every peer; stage 2 moves only the non-empty payloads.
pub fn all_to_allv<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &[Vec<WireEntry>],
) -> Result<Vec<WireEntry>, SparsityError> {
    let n = comm.size();
    let me = comm.rank();
    if outgoing.len() != n {
        return Err(SparsityError::InvariantViolation {
            context: format!("all_to_allv needs one buffer per rank ({} != {n})", outgoing.len()),
        });
    }
    if n == 1 {
        return Ok(outgoing[0].clone());
    }

    let size_tag = tag;
    let data_tag = tag.offset(1);

    // --- Stage 1: exchange entry counts with every peer ---
    let mut pending_counts = Vec::with_capacity(n - 1);
    for peer in (0..n).filter(|&p| p != me) {
        let mut buf = [0u8; 8];
        let h = comm.irecv(peer, size_tag.base(), &mut buf);
        pending_counts.push((peer, h));
    }
    let send_counts: Vec<WireCount> = outgoing.iter().map(|b| WireCount::new(b.len())).collect();
    let mut pending_sends = Vec::with_capacity(n - 1);
    for peer in (0..n).filter(|&p| p != me) {
        pending_sends.push(comm.isend(
            peer,
            size_tag.base(),
            cast_slice(std::slice::from_ref(&send_counts[peer])),
        ));
    }

    let mut inbound_counts = vec![0usize; n];
    let mut maybe_err = None;
    for (peer, h) in pending_counts {
        match h.wait() {
            Some(data) if data.len() == 8 => {
                let counts: Vec<WireCount> = bytemuck::pod_collect_to_vec(&data);
                inbound_counts[peer] = counts[0].get();
            }
            Some(data) => {
                if maybe_err.is_none() {
                    maybe_err = Some(comm_err(
                        peer,
                        format!("expected 8 bytes for count header, got {}", data.len()),
                    ));
                }
            }
            None => {
                if maybe_err.is_none() {
                    maybe_err = Some(comm_err(peer, format!("failed to receive count from rank {peer}")));
                }
            }
        }
    }
    for send in pending_sends {
        let _ = send.wait();
    }
    if let Some(err) = maybe_err {
        return Err(err);
    }

    log::trace!(
        "all_to_allv: rank {me} sends {:?} entries, expects {:?}",
        outgoing.iter().map(Vec::len).collect::<Vec<_>>(),
        inbound_counts,
    );

    // --- Stage 2: move the non-empty payloads ---
    let entry_size = std::mem::size_of::<WireEntry>();
    let mut pending_data = Vec::new();
    for peer in (0..n).filter(|&p| p != me && inbound_counts[p] > 0) {
        let mut buf = vec![0u8; inbound_counts[peer] * entry_size];
        let h = comm.irecv(peer, data_tag.base(), &mut buf);
        pending_data.push((peer, h));
    }
    let mut pending_sends = Vec::new();
    for peer in (0..n).filter(|&p| p != me && !outgoing[p].is_empty()) {
        pending_sends.push(comm.isend(peer, data_tag.base(), cast_slice(&outgoing[peer])));
    }

    let mut received: Vec<Option<Vec<WireEntry>>> = vec![None; n];
    for (peer, h) in pending_data {
        match h.wait() {
            Some(data) if data.len() == inbound_counts[peer] * entry_size => {
                received[peer] = Some(bytemuck::pod_collect_to_vec(&data));
            }
            Some(data) => {
                if maybe_err.is_none() {
                    maybe_err = Some(comm_err(
                        peer,
                        format!(
                            "expected {} payload bytes, got {}",
                            inbound_counts[peer] * entry_size,
                            data.len()
                        ),
                    ));
                }
            }
            None => {
                if maybe_err.is_none() {
                    maybe_err = Some(comm_err(peer, format!("failed to receive payload from rank {peer}")));
                }
            }
        }
    }
    for send in pending_sends {
        let _ = send.wait();
    }
    if let Some(err) = maybe_err {
        return Err(err);
    }

    // Aggregate in rank order; the self bucket is copied through.
    let mut inbound = Vec::with_capacity(inbound_counts.iter().sum::<usize>() + outgoing[me].len());
    for peer in 0..n {
        if peer == me {
            inbound.extend_from_slice(&outgoing[me]);
        } else if let Some(entries) = received[peer].take() {
            inbound.extend(entries);
        }
    }
    Ok(inbound)
}
