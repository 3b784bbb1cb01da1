//! Brush and leaf contents classification

use bitflags::bitflags;

bitflags! {
    /// Contents of a brush or leaf. Bits below `VISIBLE` are the visible
    /// contents, lower bits win when brushes overlap.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Contents: u32 {
        const SOLID = 1 << 0;
        const SKY = 1 << 1;
        const DETAIL_WALL = 1 << 2;
        const WINDOW = 1 << 3;
        const ILLUSIONARY_VISBLOCKER = 1 << 4;
        const AUX = 1 << 5;
        const LAVA = 1 << 6;
        const SLIME = 1 << 7;
        const WATER = 1 << 8;
        const MIST = 1 << 9;

        /// All visible contents bits
        const VISIBLE = (1 << 10) - 1;

        /// Brush entity origin marker, never compiled
        const ORIGIN = 1 << 10;

        /// Player clip, not part of the visible hull
        const CLIP = 1 << 11;

        /// Hint brush, contributes split planes only
        const HINT = 1 << 12;

        /// Detail modifier, detail never seals the map and lives inside clusters
        const DETAIL = 1 << 16;

        /// Liquid faces drawn from inside too
        const MIRROR_INSIDE = 1 << 17;

        const LIQUID = Self::LAVA.bits() | Self::SLIME.bits() | Self::WATER.bits();
    }
}

impl Contents {
    /// Visible part of contents
    pub fn visible(self) -> Contents {
        self & Contents::VISIBLE
    }

    /// Empty space (no visible contents)
    pub fn is_empty_space(self) -> bool {
        self.visible().is_empty()
    }

    pub fn is_solid(self) -> bool {
        self.contains(Contents::SOLID)
    }

    pub fn is_sky(self) -> bool {
        self.contains(Contents::SKY)
    }

    pub fn is_detail(self) -> bool {
        self.contains(Contents::DETAIL)
    }

    pub fn is_liquid(self) -> bool {
        self.intersects(Contents::LIQUID)
    }

    /// Structural solid or sky, blocks outside flood fill
    pub fn seals_map(self) -> bool {
        !self.is_detail() && self.intersects(Contents::SOLID | Contents::SKY)
    }

    /// Solid or sky leaf, flood fills and leak trails don't go through it
    pub fn is_opaque(self) -> bool {
        self.intersects(Contents::SOLID | Contents::SKY)
    }

    /// Contents brush gets from one face texture name
    pub fn for_texture(name: &str) -> Contents {
        let name = name.to_ascii_lowercase();

        if name == "origin" {
            Contents::ORIGIN
        } else if name == "clip" {
            Contents::CLIP
        } else if name == "hint" || name == "hintskip" {
            Contents::HINT
        } else if let Some(liquid) = name.strip_prefix('*') {
            if liquid.starts_with("lava") {
                Contents::LAVA
            } else if liquid.starts_with("slime") {
                Contents::SLIME
            } else {
                Contents::WATER
            }
        } else if name.starts_with("sky") {
            Contents::SKY
        } else {
            Contents::SOLID
        }
    }

    /// Contents implied by an entity class for brushes it owns
    pub fn for_classname(classname: &str) -> Option<Contents> {
        match classname {
            "worldspawn" | "func_group" => Some(Contents::empty()),
            "func_detail" => Some(Contents::DETAIL),
            "func_detail_wall" => Some(Contents::DETAIL_WALL | Contents::DETAIL),
            "func_detail_illusionary" => Some(Contents::MIST | Contents::DETAIL),
            "func_illusionary_visblocker" => Some(Contents::ILLUSIONARY_VISBLOCKER),
            _ => None,
        }
    }
}

/// Order in which overlapping visible contents win. First entry wins.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentsPriority {
    order: Vec<Contents>,
}

impl Default for ContentsPriority {
    /// Bit order, SOLID first and MIST last
    fn default() -> Self {
        Self {
            order: (0..10).map(|bit| Contents::from_bits_retain(1 << bit)).collect(),
        }
    }
}

impl ContentsPriority {
    /// Build priority from explicit order. Visible bits not mentioned keep bit order after listed ones.
    pub fn new(order: Vec<Contents>) -> Self {
        let mut order = order.into_iter().map(Contents::visible).filter(|c| !c.is_empty()).collect::<Vec<_>>();

        for bit in Self::default().order {
            if !order.iter().any(|c| c.contains(bit)) {
                order.push(bit);
            }
        }

        Self { order }
    }

    /// Winning visible bit of a visible contents set
    pub fn winner(&self, contents: Contents) -> Contents {
        self.order
            .iter()
            .copied()
            .find(|c| contents.intersects(*c))
            .map(|c| c & contents)
            .unwrap_or(Contents::empty())
    }

    /// Combine contents of two overlapping brushes
    ///
    /// Result keeps only the winning visible bit. DETAIL survives only if
    /// every side holding the winning bit is detail.
    pub fn combine(&self, a: Contents, b: Contents) -> Contents {
        let winner = self.winner((a | b).visible());

        if winner.is_empty() {
            return (a | b) & Contents::MIRROR_INSIDE;
        }

        let detail = [a, b]
            .iter()
            .filter(|c| c.intersects(winner))
            .all(|c| c.is_detail());

        let mut result = winner | ((a | b) & Contents::MIRROR_INSIDE);
        if detail {
            result |= Contents::DETAIL;
        }
        result
    }

    /// Combine a sequence of contents, empty sequence is empty space
    pub fn combine_all(&self, iter: impl IntoIterator<Item = Contents>) -> Contents {
        iter.into_iter().fold(None, |acc: Option<Contents>, c| {
            Some(match acc {
                Some(acc) => self.combine(acc, c),
                None => self.combine(c, Contents::empty()),
            })
        }).unwrap_or(Contents::empty())
    }
}
