/// A Node is an entity that can publish and react to subscribed messages.
///
/// Nodes are driven by the owner of the main loop; all input arrives through `pubsub`
/// subscriptions and all output leaves through publishers.
pub trait Node {
    /// Allows the Node to update itself and perform logic. Called once per loop iteration.
    fn update(&mut self) {}

    /// Called when the Node should terminate. Terminate background threads etc. here.
    fn terminate(&mut self) {}
}
