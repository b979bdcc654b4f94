// Layer stack - ordered per-frame application code
//
// [ layer, layer, ... | overlay, overlay, ... ]
//                     ^ insert_index
//
// Layers go in before every overlay; overlays go on the end. Updates run
// front to back, so overlays (e.g. the one that ends the frame) run last.
// Names are unique across the whole stack.

use anyhow::Result;

/// A unit of per-frame work, parameterized over the context it runs with.
pub trait Layer<C> {
    fn name(&self) -> &str;

    /// Called once when pushed. An error leaves the layer out of the stack.
    fn on_attach(&mut self, _ctx: &mut C) -> Result<()> {
        log::info!("Layer {} attached", self.name());
        Ok(())
    }

    fn on_detach(&mut self, _ctx: &mut C) {
        log::info!("Layer {} detached", self.name());
    }

    fn on_update(&mut self, ctx: &mut C) -> Result<()>;
}

pub struct LayerStack<C> {
    layers: Vec<Box<dyn Layer<C>>>,
    insert_index: usize,
}

impl<C> Default for LayerStack<C> {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            insert_index: 0,
        }
    }
}

impl<C> LayerStack<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `layer` after the existing layers, before any overlay.
    pub fn push_layer(&mut self, mut layer: Box<dyn Layer<C>>, ctx: &mut C) -> Result<()> {
        if self.contains(layer.name()) {
            log::error!("Layer {} is already in the stack, not pushing it again", layer.name());
            return Ok(());
        }

        layer.on_attach(ctx)?;
        self.layers.insert(self.insert_index, layer);
        self.insert_index += 1;
        Ok(())
    }

    /// Append `overlay` after everything else.
    pub fn push_overlay(&mut self, mut overlay: Box<dyn Layer<C>>, ctx: &mut C) -> Result<()> {
        if self.contains(overlay.name()) {
            log::error!("Overlay {} is already in the stack, not pushing it again", overlay.name());
            return Ok(());
        }

        overlay.on_attach(ctx)?;
        self.layers.push(overlay);
        Ok(())
    }

    /// Detach and remove the first entry named `name`, searching from the front.
    pub fn remove_layer(&mut self, name: &str, ctx: &mut C) -> Option<Box<dyn Layer<C>>> {
        let index = self.layers.iter().position(|l| l.name() == name)?;
        Some(self.remove_at(index, ctx))
    }

    /// Detach and remove the first entry named `name`, searching from the back.
    pub fn remove_overlay(&mut self, name: &str, ctx: &mut C) -> Option<Box<dyn Layer<C>>> {
        let index = self.layers.iter().rposition(|l| l.name() == name)?;
        Some(self.remove_at(index, ctx))
    }

    fn remove_at(&mut self, index: usize, ctx: &mut C) -> Box<dyn Layer<C>> {
        if index < self.insert_index {
            self.insert_index -= 1;
        }

        let mut layer = self.layers.remove(index);
        layer.on_detach(ctx);
        layer
    }

    /// Run every entry front to back. Stops at the first error.
    pub fn update_all(&mut self, ctx: &mut C) -> Result<()> {
        for layer in &mut self.layers {
            layer.on_update(ctx)?;
        }
        Ok(())
    }

    /// Detach everything, overlays first.
    pub fn detach_all(&mut self, ctx: &mut C) {
        while let Some(mut layer) = self.layers.pop() {
            layer.on_detach(ctx);
        }
        self.insert_index = 0;
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layers.iter().any(|l| l.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.layers.iter().map(|l| l.name())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
