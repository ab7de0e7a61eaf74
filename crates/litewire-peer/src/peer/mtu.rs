use tracing::{debug, trace};

use litewire_protocol::{control, Packet, PacketProperty};

use super::Peer;
use crate::{context::PeerContext, lock};

impl Peer {
    pub(super) fn process_mtu_packet(&self, ctx: &dyn PeerContext, mut packet: Packet) {
        let Some(value) = control::mtu_value(&packet) else {
            trace!("Malformed MTU probe from {}", self.address);
            ctx.recycle(packet);
            return;
        };

        if packet.property() == PacketProperty::MtuCheck {
            lock(&self.mtu).probe_received();
            packet.set_property(PacketProperty::MtuOk);
            let _ = self.send_raw(ctx, packet.as_slice());
            ctx.recycle(packet);
            return;
        }

        if lock(&self.mtu).confirm(value) {
            debug!("MTU to {} raised to {}", self.address, value);
        }
        ctx.recycle(packet);
    }

    pub(super) fn update_mtu(&self, ctx: &dyn PeerContext, delta_ms: u64) {
        let mut mtu = lock(&self.mtu);
        let Some(probe_size) = mtu.tick(delta_ms) else {
            return;
        };

        let mut probe = control::mtu_check(probe_size);
        probe.set_connection_number(self.connection_number());
        match self.send_raw(ctx, probe.as_slice()) {
            Ok(sent) if sent > 0 => trace!("Sent MTU probe of {} bytes to {}", probe_size, self.address),
            _ => mtu.probe_failed(),
        }
    }

    /// Drops back to the minimal MTU and restarts discovery, used when the remote side
    /// reports that our address changed.
    pub fn reset_mtu(&self) {
        lock(&self.mtu).reset();
    }
}
