use async_trait::async_trait;

use super::{load_candidates, AutoplaySource, Platform};
use crate::{error::Result, model::Track, player::Player};

/// Strategy for platforms whose node source manager exposes a recommendation
/// scheme (`dzrec`, `tdrec`, `vkrec`, `qbrec`): the node does all the work,
/// we only hand it the seed identifier.
pub(crate) struct ProbeSource {
    platform: Platform,
    scheme: &'static str,
}

impl ProbeSource {
    pub fn new(platform: Platform, scheme: &'static str) -> Self {
        Self { platform, scheme }
    }
}

#[async_trait]
impl AutoplaySource for ProbeSource {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn recommend(&self, player: &Player, seed: &Track) -> Result<Vec<Track>> {
        let identifier = format!("{}:{}", self.scheme, seed.identifier);
        load_candidates(player, &identifier).await
    }
}
