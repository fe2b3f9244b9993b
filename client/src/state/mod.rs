pub mod demo;

use std::sync::Arc;
use egui::{Context, FullOutput, TopBottomPanel};
use egui_wgpu::{Renderer, RendererOptions, ScreenDescriptor};
use log::{info, warn};
use wgpu::{Backends, ExperimentalFeatures, Features, Instance, InstanceDescriptor, MemoryHints, SurfaceError, Trace};
use winit::window::Window;

use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;

use crate::map::buildings::BuildingPlacement;
use crate::map::events::{HostEvent, InputCommand};
use crate::map::loader::TextureLoader;
use crate::map::renderer::SceneRenderer;
use crate::map::roads::RoadSegment;
use crate::map::{Compositor, EngineConfig};

const DEMO_WORLD_SIZE: u32 = 128;
const TERRAIN_TYPES: [&str; 2] = ["Earth", "Alien"];
const SEASONS: [&str; 4] = ["Spring", "Summer", "Autumn", "Winter"];

/// Debug panel toggles
#[derive(Default)]
struct PanelState {
    zones: bool,
    placement: bool,
    road_drawing: bool,
    terrain_type: usize,
    season: usize,
    last_clicked: Option<String>,
}

// Window, GPU and engine state
pub struct State {
    pub window: Arc<Window>,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub is_surface_configured: bool,
    resize_request: Option<PhysicalSize<u32>>,
    ui_renderer: Renderer,
    egui_ctx: Context,
    egui_state: egui_winit::State,
    draw_egui: bool,
    egui_output: Option<FullOutput>,

    compositor: Compositor,
    scene: SceneRenderer,
    loader: TextureLoader,
    buildings: Vec<BuildingPlacement>,
    segments: Vec<RoadSegment>,
    panel: PanelState,
}

impl State {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let instance = Instance::new(&InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let surface: wgpu::Surface<'_> = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Main Device"),
                required_features: Features::empty(),
                required_limits: if cfg!(target_arch = "wasm32") {
                    wgpu::Limits::downlevel_webgl2_defaults()
                } else {
                    wgpu::Limits::default()
                },
                experimental_features: ExperimentalFeatures::disabled(),
                memory_hints: MemoryHints::Performance,
                trace: Trace::Off,
            })
            .await?;

        let cap: wgpu::SurfaceCapabilities = surface.get_capabilities(&adapter);

        let texture_format = cap
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .copied()
            .unwrap_or(cap.formats[0]);

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: texture_format,
            width: size.width,
            height: size.height,
            present_mode: cap.present_modes[0],
            alpha_mode: cap.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let ui_renderer = Renderer::new(&device, texture_format, RendererOptions {
            msaa_samples: 0,
            depth_stencil_format: None,
            dithering: false,
            predictable_texture_filtering: false,
        });
        let egui_ctx = Context::default();

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui_ctx.viewport_id(),
            window.as_ref(),
            egui_ctx.native_pixels_per_point(),
            window.theme(),
            None,
        );

        let engine_config = EngineConfig::from_env();
        info!("Loading textures from {}", engine_config.asset_base_url);
        let loader = TextureLoader::new(&engine_config.asset_base_url, &engine_config.user_agent);
        let scene = SceneRenderer::new(&device, texture_format);

        let world = demo::demo_world(DEMO_WORLD_SIZE);
        let mut compositor = Compositor::new(engine_config, size.width.max(1), size.height.max(1));
        compositor.load_terrain(Arc::new(world.terrain), TERRAIN_TYPES[0], 0);
        compositor.set_segments(world.segments.clone());
        compositor.set_buildings(world.buildings.clone());

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            is_surface_configured: false,
            resize_request: None,
            ui_renderer,
            egui_ctx,
            egui_state,
            draw_egui: true,
            egui_output: None,
            compositor,
            scene,
            loader,
            buildings: world.buildings,
            segments: world.segments,
            panel: PanelState::default(),
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            if !self.is_surface_configured {
                self.apply_size(width, height);
                self.is_surface_configured = true;
            } else {
                self.resize_request = Some(PhysicalSize::new(width, height));
            }
            self.compositor.push_input(InputCommand::Resize { width, height });
        }
    }

    fn apply_size(&mut self, width: u32, height: u32) {
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    pub fn handle_input(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(self.window.as_ref(), event);
        self.draw_egui = response.repaint;
        response.consumed
    }

    /// Forward a map command to the compositor
    pub fn push_map_input(&mut self, command: InputCommand) {
        self.compositor.push_input(command);
    }

    pub fn update(&mut self) {
        let (_, events) = self.compositor.tick(&mut self.loader);
        for event in events {
            self.handle_host_event(event);
        }

        let stats = self.compositor.last_stats();
        let cache = self.compositor.cache_stats();
        let pool = self.compositor.pool_stats();
        let layers = self.compositor.layer_counts();
        let zoom = self.compositor.camera.zoom.level;
        let hovered = self.compositor.hovered_tile();
        let gpu_textures = self.scene.texture_count();
        let gpu_memory = self.scene.memory_usage();

        let before = (
            self.panel.zones,
            self.panel.placement,
            self.panel.road_drawing,
            self.panel.terrain_type,
            self.panel.season,
        );

        let panel = &mut self.panel;
        let input = self.egui_state.take_egui_input(self.window.as_ref());
        let output = self.egui_ctx.run(input, |ctx| {
            TopBottomPanel::top("menu").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.checkbox(&mut panel.zones, "Zones");
                    ui.checkbox(&mut panel.placement, "Place building");
                    ui.checkbox(&mut panel.road_drawing, "Draw roads");
                    egui::ComboBox::from_label("Terrain")
                        .selected_text(TERRAIN_TYPES[panel.terrain_type])
                        .show_ui(ui, |ui| {
                            for (i, name) in TERRAIN_TYPES.iter().enumerate() {
                                ui.selectable_value(&mut panel.terrain_type, i, *name);
                            }
                        });
                    egui::ComboBox::from_label("Season")
                        .selected_text(SEASONS[panel.season])
                        .show_ui(ui, |ui| {
                            for (i, name) in SEASONS.iter().enumerate() {
                                ui.selectable_value(&mut panel.season, i, *name);
                            }
                        });
                });
                ui.collapsing("Stats", |ui| {
                    ui.label(format!(
                        "zoom {} | hover {:?} | frame {:.2} ms | sorted {}",
                        zoom, hovered, stats.frame_time_ms, stats.sorted
                    ));
                    ui.label(format!(
                        "layers: terrain {} (tall {}) pavement {} roads {} buildings {} overlay {}",
                        layers.terrain,
                        layers.tall_terrain,
                        layers.pavement,
                        layers.roads,
                        layers.buildings,
                        layers.overlay
                    ));
                    ui.label(format!(
                        "pool: {} in use / {} total, {} allocated, {} released",
                        pool.in_use, pool.total, pool.allocations, pool.releases
                    ));
                    ui.label(format!(
                        "cache: {}/{} ({:.1}%), {} pending, {} evicted",
                        cache.texture_count,
                        cache.capacity,
                        cache.usage_percent(),
                        cache.pending,
                        cache.evictions
                    ));
                    ui.label(format!(
                        "gpu: {} textures, {:.1} MB",
                        gpu_textures,
                        gpu_memory as f64 / (1024.0 * 1024.0)
                    ));
                    if let Some(clicked) = &panel.last_clicked {
                        ui.label(format!("clicked: {}", clicked));
                    }
                });
            });
        });
        self.egui_output = Some(output);

        self.apply_panel(before);
    }

    /// Push panel changes into the compositor
    fn apply_panel(&mut self, before: (bool, bool, bool, usize, usize)) {
        let (zones, placement, road_drawing, terrain_type, season) = before;
        if self.panel.zones != zones {
            self.compositor.set_zone_overlay(self.panel.zones, None);
        }
        if self.panel.placement != placement {
            self.compositor.set_placement_mode(self.panel.placement, Some((2, 2)));
            if self.panel.placement {
                self.panel.road_drawing = false;
            }
        }
        if self.panel.road_drawing != road_drawing {
            self.compositor.set_road_drawing_mode(self.panel.road_drawing);
            if self.panel.road_drawing {
                self.panel.placement = false;
            }
        }
        if self.panel.terrain_type != terrain_type || self.panel.season != season {
            self.compositor
                .set_terrain_style(TERRAIN_TYPES[self.panel.terrain_type], self.panel.season as u8);
        }
    }

    /// Act as the embedding host for the demo world
    fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::ZoneDataRequested(b) => {
                let zones = demo::demo_zones(b.min_row, b.min_col, b.max_row, b.max_col);
                self.compositor.set_zone_overlay(true, Some(zones));
            }
            HostEvent::BuildingClicked { x, y, class } => {
                info!("Clicked {} at ({}, {})", class, x, y);
                self.panel.last_clicked = Some(format!("{} at ({}, {})", class, x, y));
            }
            HostEvent::PlacementRequested { x, y, xsize, ysize } => {
                self.buildings.push(BuildingPlacement::new(x, y, "house", xsize, ysize));
                self.compositor.set_buildings(self.buildings.clone());
            }
            HostEvent::RoadSegmentCompleted(segment) => {
                self.segments.push(segment);
                self.compositor.set_segments(self.segments.clone());
            }
            HostEvent::ViewportChanged(b) => {
                log::debug!("Viewport now rows {}..={} cols {}..={}", b.min_row, b.max_row, b.min_col, b.max_col);
            }
            HostEvent::PlacementCancelled => self.panel.placement = false,
            HostEvent::RoadDrawingCancelled => self.panel.road_drawing = false,
        }
    }

    pub fn render(&mut self) -> Result<(), SurfaceError> {
        self.window.request_redraw();

        if !self.is_surface_configured {
            return Ok(());
        }

        if let Some(PhysicalSize { width, height }) = self.resize_request.take() {
            self.apply_size(width, height)
        }

        self.scene.prepare(&self.device, &self.queue, &mut self.compositor);

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(_) => {
                self.surface.configure(&self.device, &self.config);
                self.surface.get_current_texture()?
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

        {
            let render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.05,
                            g: 0.07,
                            b: 0.1,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            let mut render_pass = render_pass.forget_lifetime();

            self.scene.render(&mut render_pass);

            if let Some(output) = self.egui_output.take().filter(|_| self.draw_egui) {
                let FullOutput {
                    platform_output,
                    textures_delta,
                    shapes,
                    pixels_per_point,
                    viewport_output
                } = output;

                for _ in viewport_output {
                    warn!("Viewport change is not handled!")
                }

                self.egui_state.handle_platform_output(self.window.as_ref(), platform_output);

                for (id, delta) in textures_delta.set {
                    self.ui_renderer.update_texture(&self.device, &self.queue, id, &delta);
                }
                let descriptor = ScreenDescriptor {
                    size_in_pixels: [self.config.width, self.config.height],
                    pixels_per_point,
                };
                let primitives = self.egui_ctx.tessellate(shapes, pixels_per_point);

                self.ui_renderer.update_buffers(&self.device, &self.queue, &mut encoder, &primitives, &descriptor);
                self.ui_renderer.render(&mut render_pass, &primitives, &descriptor);

                for id in textures_delta.free {
                    self.ui_renderer.free_texture(&id)
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        Ok(())
    }
}
