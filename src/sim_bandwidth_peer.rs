use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::sim_config::SimConfig;
use crate::sim_context::SimContext;
use crate::sim_interface::{Link, Message, NodeId, START_RECV_DATA, STOP_RECV_DATA};
use crate::sim_random::dist;

/// Upload/download capacity of a bandwidth-aware peer. Peers embed one and
/// use it to start and stop stripe transfers within their limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthProfile {
    pub upload: u64,
    pub download: u64,
}

impl BandwidthProfile {
    /// Upload from the residential capacity table, download enough for
    /// every stripe at once.
    pub fn sample<R: Rng + ?Sized>(config: &SimConfig, rng: &mut R) -> Self {
        Self {
            upload: dist::upload_capacity(rng),
            download: config.num_of_stripes * config.stripe_rate,
        }
    }

    pub fn available_upload(&self, ctx: &SimContext<'_>, me: NodeId) -> u64 {
        self.upload.saturating_sub(ctx.total_upload(me))
    }

    pub fn available_download(&self, ctx: &SimContext<'_>, me: NodeId) -> u64 {
        self.download.saturating_sub(ctx.total_download(me))
    }

    /// Ask `dest` to start receiving a stripe from us. Refused (returns
    /// false) when one more stripe would exceed our upload capacity.
    pub fn start_send_data(&self, ctx: &mut SimContext<'_>, link: &dyn Link, dest: NodeId) -> bool {
        let rate = ctx.config().stripe_rate;
        if ctx.total_upload(link.id()) + rate > self.upload {
            return false;
        }
        link.send(ctx, dest, Message::new(START_RECV_DATA));
        true
    }

    pub fn stop_send_data(&self, ctx: &mut SimContext<'_>, link: &dyn Link, dest: NodeId) {
        link.send(ctx, dest, Message::new(STOP_RECV_DATA));
    }
}
