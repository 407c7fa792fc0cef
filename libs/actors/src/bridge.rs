//! Bridge and Open
//!
//! Both operations grow the actor forest by minting a transport pair and
//! handing each end to the process that will own it, wrapped in a
//! `ChannelOpened` control message. Neither waits for the new channel: the
//! recipients instantiate their actors when the control message is
//! dispatched.
//!
//! Delivery is all-or-nothing. Outbound slots for both messages are
//! reserved before either message is committed; if any reservation fails
//! both descriptors are closed and the operation reports false.

use ipc_network::{
    Channel, ChannelOpened, Listener, Priority, ProcessId, ProtocolId, TransportFactory,
    TransportMode,
};
use tracing::{debug, warn};

/// Connect two processes that each share a channel with us
///
/// `parent_channel` leads to `parent_pid`, `child_channel` to `child_pid`.
/// The parent side instantiates `protocol`, the child side
/// `child_protocol`. Both messages travel urgent.
pub fn bridge<P: Listener, C: Listener>(
    factory: &dyn TransportFactory,
    parent_channel: &Channel<P>,
    parent_pid: ProcessId,
    child_channel: &Channel<C>,
    child_pid: ProcessId,
    protocol: ProtocolId,
    child_protocol: ProtocolId,
) -> bool {
    if parent_pid.is_sentinel() || child_pid.is_sentinel() {
        warn!(%parent_pid, %child_pid, "Bridge refused: sentinel process id");
        return false;
    }

    let (parent_side, child_side) = match factory.create_transport(parent_pid) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(%parent_pid, error = %e, "Bridge failed to create transport");
            return false;
        }
    };

    let permits = parent_channel
        .reserve(Priority::Urgent)
        .and_then(|parent| Ok((parent, child_channel.reserve(Priority::Urgent)?)));
    let (parent_permit, child_permit) = match permits {
        Ok(permits) => permits,
        Err(e) => {
            warn!(%parent_pid, %child_pid, error = %e, "Bridge send failed; closing both descriptors");
            factory.close_descriptor(parent_side);
            factory.close_descriptor(child_side);
            return false;
        }
    };

    let to_parent =
        ChannelOpened::new(parent_side, child_pid, protocol, Priority::Urgent).into_message();
    let to_child =
        ChannelOpened::new(child_side, parent_pid, child_protocol, Priority::Urgent).into_message();
    if let Err(e) = parent_permit
        .check(&to_parent)
        .and_then(|()| child_permit.check(&to_child))
    {
        // Dropping both messages closes both descriptors
        warn!(%parent_pid, %child_pid, error = %e, "Bridge message exceeds channel limits");
        return false;
    }
    parent_permit.send(to_parent);
    child_permit.send(to_child);

    debug!(%parent_pid, %child_pid, %protocol, %child_protocol, "Bridge committed");
    true
}

/// Open a second, independent channel to the peer of `opener_channel`
///
/// `opener_mode` says which end of the new transport is ours: `Server`
/// makes us the parent side running `protocol`, `Client` the child side
/// running `child_protocol`. Our `ChannelOpened` is echoed through our own
/// dispatch path; the peer's is sent on `opener_channel`.
pub fn open<L: Listener>(
    factory: &dyn TransportFactory,
    opener_channel: &Channel<L>,
    local_pid: ProcessId,
    other_pid: ProcessId,
    opener_mode: TransportMode,
    protocol: ProtocolId,
    child_protocol: ProtocolId,
) -> bool {
    let is_parent = opener_mode == TransportMode::Server;
    let (parent_pid, child_pid) = if is_parent {
        (local_pid, other_pid)
    } else {
        (other_pid, local_pid)
    };
    if !parent_pid.is_valid() || !child_pid.is_valid() {
        warn!(%parent_pid, %child_pid, "Open refused: invalid process id");
        return false;
    }

    let (parent_side, child_side) = match factory.create_transport(parent_pid) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(%parent_pid, error = %e, "Open failed to create transport");
            return false;
        }
    };

    let permit = match opener_channel.reserve(Priority::Normal) {
        Ok(permit) => permit,
        Err(e) => {
            warn!(%other_pid, error = %e, "Open send failed; closing both descriptors");
            factory.close_descriptor(parent_side);
            factory.close_descriptor(child_side);
            return false;
        }
    };

    let parent_msg = ChannelOpened::new(parent_side, child_pid, protocol, Priority::Normal);
    let child_msg = ChannelOpened::new(child_side, parent_pid, child_protocol, Priority::Normal);
    let (ours, theirs) = if is_parent {
        (parent_msg, child_msg)
    } else {
        (child_msg, parent_msg)
    };

    let theirs = theirs.into_message();
    if let Err(e) = permit.check(&theirs) {
        warn!(%other_pid, error = %e, "Open message exceeds channel limits");
        return false;
    }

    // A rejected echo drops its message, closing our descriptor with it
    if !opener_channel.echo(ours.into_message()) {
        warn!(%other_pid, "Open echo failed; closing peer descriptor");
        return false;
    }
    permit.send(theirs);

    debug!(%local_pid, %other_pid, ?opener_mode, %protocol, %child_protocol, "Open committed");
    true
}
