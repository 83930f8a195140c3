use shared::domain::CameraPosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Idle,
    Moving { generation: u64 },
}

/// Whether a camera event belongs to the move currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Current,
    Stale,
}

/// Tracks the single active camera move of a map view. Each move gets a new
/// generation; events from a preempted move never return the view to `Idle`.
#[derive(Debug)]
pub struct CameraStateMachine {
    state: CameraState,
    last_generation: u64,
    last_position: Option<CameraPosition>,
}

impl Default for CameraStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraStateMachine {
    pub fn new() -> Self {
        Self {
            state: CameraState::Idle,
            last_generation: 0,
            last_position: None,
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn is_moving(&self) -> bool {
        matches!(self.state, CameraState::Moving { .. })
    }

    pub fn last_position(&self) -> Option<CameraPosition> {
        self.last_position
    }

    pub fn begin_move(&mut self) -> u64 {
        self.last_generation += 1;
        self.state = CameraState::Moving {
            generation: self.last_generation,
        };
        self.last_generation
    }

    pub fn observe(
        &mut self,
        generation: u64,
        position: CameraPosition,
        finished: bool,
    ) -> Observation {
        if generation != self.last_generation {
            return Observation::Stale;
        }
        self.last_position = Some(position);
        if finished {
            self.state = CameraState::Idle;
        }
        Observation::Current
    }

    /// Returns to `Idle` if `generation` is still the active move. Used when
    /// the surface rejects a move outright.
    pub fn abort(&mut self, generation: u64) {
        if self.state == (CameraState::Moving { generation }) {
            self.state = CameraState::Idle;
        }
    }
}
