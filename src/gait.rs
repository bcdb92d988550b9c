// Leg joints and the scripted gaits built on them
//
// A gait is a list of poses. Each pose commands some joints, then waits for
// every leg joint to settle before the next pose starts.

use std::sync::Arc;

use tracing::info;

use crate::action::{ActionContext, ActionError, Behavior};
use crate::config::{
    JOINT_MAX_ANGLE, JOINT_MIN_ANGLE, SERVO_ID_LEFT_FOOT, SERVO_ID_LEFT_LEG, SERVO_ID_RIGHT_FOOT,
    SERVO_ID_RIGHT_LEG,
};
use crate::face::FaceDisplay;
use crate::joint::{Joint, JointGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limb {
    LeftFoot,
    LeftLeg,
    RightFoot,
    RightLeg,
}

impl Limb {
    pub const ALL: [Limb; 4] = [Limb::LeftFoot, Limb::LeftLeg, Limb::RightFoot, Limb::RightLeg];

    /// Joint name, also the calibration key
    pub fn name(self) -> &'static str {
        match self {
            Limb::LeftFoot => "left_foot",
            Limb::LeftLeg => "left_leg",
            Limb::RightFoot => "right_foot",
            Limb::RightLeg => "right_leg",
        }
    }

    pub fn servo_id(self) -> u8 {
        match self {
            Limb::LeftFoot => SERVO_ID_LEFT_FOOT,
            Limb::LeftLeg => SERVO_ID_LEFT_LEG,
            Limb::RightFoot => SERVO_ID_RIGHT_FOOT,
            Limb::RightLeg => SERVO_ID_RIGHT_LEG,
        }
    }
}

/// (limb, angle in degrees, speed in percent of base speed)
pub type Pose = &'static [(Limb, f32, u8)];

const LF: Limb = Limb::LeftFoot;
const LL: Limb = Limb::LeftLeg;
const RF: Limb = Limb::RightFoot;
const RL: Limb = Limb::RightLeg;

// Stand straight, rock onto the left foot, then settle on the first stride
const WALK_ENTER: &[Pose] = &[
    &[(RF, 0.0, 50), (LF, 0.0, 50), (RL, 0.0, 50), (LL, 0.0, 50)],
    &[(RF, 40.0, 100), (LF, 20.0, 50)],
    &[(RF, 20.0, 100), (RL, 15.0, 50), (LL, 15.0, 50)],
    &[(RF, 0.0, 50), (LF, 0.0, 50)],
];

// One full stride: a step on each side
const WALK_CYCLE: &[Pose] = &[
    &[(RF, -20.0, 50), (LF, -40.0, 100)],
    &[(LF, -20.0, 100), (RL, -15.0, 50), (LL, -15.0, 50)],
    &[(RF, 0.0, 50), (LF, 0.0, 50)],
    &[(RF, 40.0, 100), (LF, 20.0, 50)],
    &[(RF, 20.0, 100), (RL, 15.0, 50), (LL, 15.0, 50)],
    &[(RF, 0.0, 50), (LF, 0.0, 50)],
];

// Bring the legs back together and stand straight
const WALK_EXIT: &[Pose] = &[
    &[(RF, -20.0, 50), (LF, -40.0, 100)],
    &[(LF, -20.0, 100), (RL, 0.0, 50), (LL, 0.0, 50)],
    &[(RF, 0.0, 50), (LF, 0.0, 50)],
];

/// The four leg joints with the groups gaits work on
#[derive(Debug, Clone)]
pub struct Legs {
    joints: [Joint; 4],
    all: JointGroup,
    left: JointGroup,
    right: JointGroup,
}

impl Legs {
    pub fn new(left_foot: Joint, left_leg: Joint, right_foot: Joint, right_leg: Joint) -> Self {
        let all = JointGroup::new(
            "all",
            [left_foot.clone(), left_leg.clone(), right_foot.clone(), right_leg.clone()],
        );
        let left = JointGroup::new("left", [left_foot.clone(), left_leg.clone()]);
        let right = JointGroup::new("right", [right_foot.clone(), right_leg.clone()]);
        Self {
            joints: [left_foot, left_leg, right_foot, right_leg],
            all,
            left,
            right,
        }
    }

    pub fn joint(&self, limb: Limb) -> &Joint {
        &self.joints[limb as usize]
    }

    pub fn all(&self) -> &JointGroup {
        &self.all
    }

    pub fn left(&self) -> &JointGroup {
        &self.left
    }

    pub fn right(&self) -> &JointGroup {
        &self.right
    }

    pub fn apply(&self, pose: Pose) {
        for &(limb, angle, speed) in pose {
            self.joint(limb).set_angle(angle, speed, true);
        }
    }

    /// Apply each pose in turn, waiting for the legs to settle after each
    async fn play(&self, ctx: &ActionContext, poses: &[Pose]) -> Result<(), ActionError> {
        for pose in poses {
            self.apply(pose);
            ctx.wait_until_idle(&self.all).await?;
        }
        Ok(())
    }
}

/// Forward walk, started and stopped by double taps
pub struct Walk {
    legs: Legs,
    face: Arc<dyn FaceDisplay>,
}

impl Walk {
    pub fn new(legs: Legs, face: Arc<dyn FaceDisplay>) -> Self {
        Self { legs, face }
    }

    pub fn legs(&self) -> &Legs {
        &self.legs
    }
}

impl Behavior for Walk {
    async fn enter(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        self.face.display_text("walk");
        self.legs.play(ctx, WALK_ENTER).await
    }

    async fn step(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        let remaining = ctx.remaining();
        info!("Walk cycle, {} left", remaining);
        self.face.display_text(&remaining.to_string());
        self.legs.play(ctx, WALK_CYCLE).await
    }

    async fn exit(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        self.legs.play(ctx, WALK_EXIT).await?;
        self.face.display_text("");
        Ok(())
    }
}

/// Swing a group of joints end to end; used to check servo travel
pub struct Sweep {
    group: JointGroup,
    speed_percent: u8,
}

impl Sweep {
    pub fn new(group: JointGroup, speed_percent: u8) -> Self {
        Self { group, speed_percent }
    }

    fn command(&self, angle: f32) {
        for joint in self.group.joints() {
            joint.set_angle(angle, self.speed_percent, true);
        }
    }
}

impl Behavior for Sweep {
    async fn enter(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        self.command(JOINT_MIN_ANGLE);
        ctx.wait_until_idle(&self.group).await
    }

    async fn step(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        self.command(JOINT_MAX_ANGLE);
        ctx.wait_until_idle(&self.group).await?;
        self.command(JOINT_MIN_ANGLE);
        ctx.wait_until_idle(&self.group).await
    }

    async fn exit(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        self.command(0.0);
        ctx.wait_until_idle(&self.group).await
    }
}
