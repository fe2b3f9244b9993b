//! Host notifications and queued pointer/keyboard commands
//!
//! Both directions are queues drained once per tick, so event handling never
//! interleaves with a layer update.

use std::collections::VecDeque;

use super::camera::ViewportBounds;
use super::roads::RoadSegment;

/// Notification for the embedding host
#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    /// Zone data is needed for this tile rectangle
    ZoneDataRequested(ViewportBounds),
    BuildingClicked { x: i32, y: i32, class: String },
    /// A valid placement preview was clicked
    PlacementRequested { x: i32, y: i32, xsize: u32, ysize: u32 },
    RoadSegmentCompleted(RoadSegment),
    ViewportChanged(ViewportBounds),
    PlacementCancelled,
    RoadDrawingCancelled,
}

/// Raw input in screen pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputCommand {
    PointerMoved { x: f64, y: f64 },
    PointerPressed { x: f64, y: f64 },
    PointerReleased { x: f64, y: f64 },
    /// Positive notches zoom in
    Wheel { notches: i32, x: f64, y: f64 },
    Cancel,
    Resize { width: u32, height: u32 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&HostEvent)>;

/// Subscription list plus pending notifications
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    queue: Vec<HostEvent>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&HostEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn emit(&mut self, event: HostEvent) {
        self.queue.push(event);
    }

    /// Deliver queued events to every subscriber, returning them in order
    pub fn dispatch(&mut self) -> Vec<HostEvent> {
        let events = std::mem::take(&mut self.queue);
        for event in &events {
            for (_, callback) in &mut self.subscribers {
                callback(event);
            }
        }
        events
    }

    pub fn pending(&self) -> &[HostEvent] {
        &self.queue
    }
}

/// FIFO of input commands
#[derive(Default)]
pub struct InputQueue {
    commands: VecDeque<InputCommand>,
}

impl InputQueue {
    pub fn push(&mut self, command: InputCommand) {
        self.commands.push_back(command);
    }

    pub fn pop(&mut self) -> Option<InputCommand> {
        self.commands.pop_front()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
