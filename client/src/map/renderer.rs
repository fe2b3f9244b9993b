//! wgpu sprite renderer with texture management

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::cache::{TextureCache, TextureId, TextureUpload};
use super::camera::IsoCamera;
use super::pool::Sprite;
use super::Compositor;

/// Vertex for sprite rendering
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SpriteVertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
    pub color: [f32; 4],
}

impl SpriteVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x2,
        1 => Float32x2,
        2 => Float32x4,
    ];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<SpriteVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// Index pattern for one quad (2 triangles)
const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// Consecutive quads sharing one texture
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DrawRun {
    pub texture: TextureId,
    pub first_index: u32,
    pub index_count: u32,
}

/// GPU copy of a cached texture
pub struct GpuTexture {
    #[allow(dead_code)]
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    pub memory_size: usize,
}

/// Sprite renderer
pub struct SceneRenderer {
    render_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    textures: HashMap<TextureId, GpuTexture>,
    vertex_buffer: Option<wgpu::Buffer>,
    index_buffer: Option<wgpu::Buffer>,
    runs: Vec<DrawRun>,
}

impl SceneRenderer {
    /// Create a new sprite renderer
    pub fn new(device: &wgpu::Device, texture_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Sprite Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/sprite.wgsl").into()),
        });

        // Bind group layout for texture + sampler
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sprite Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sprite Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Sprite Render Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[SpriteVertex::desc()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: texture_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Pixel art: no filtering between texels
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Sprite Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            render_pipeline,
            bind_group_layout,
            sampler,
            textures: HashMap::new(),
            vertex_buffer: None,
            index_buffer: None,
            runs: Vec::new(),
        }
    }

    /// Apply queued uploads and releases from the texture cache.
    ///
    /// Uploads go first so a release always wins for the same id.
    pub fn sync_textures(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, cache: &mut TextureCache) {
        for upload in cache.take_uploads() {
            let gpu = self.create_gpu_texture(device, queue, &upload);
            self.textures.insert(upload.id, gpu);
        }
        for id in cache.take_releases() {
            if self.textures.remove(&id).is_some() {
                log::debug!("Released GPU texture {:?}", id);
            }
        }
    }

    fn create_gpu_texture(&self, device: &wgpu::Device, queue: &wgpu::Queue, upload: &TextureUpload) -> GpuTexture {
        let (width, height) = upload.image.dimensions();
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Sprite Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &upload.image,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );

        let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sprite Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        GpuTexture {
            texture,
            bind_group,
            memory_size: (width * height * 4) as usize,
        }
    }

    /// Upload textures and build this frame's vertex data
    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, compositor: &mut Compositor) {
        self.sync_textures(device, queue, compositor.cache_mut());

        let (vertices, runs) = build_quads(compositor.pool().draw_list(), &compositor.camera);
        self.runs = runs;
        if vertices.is_empty() {
            return;
        }

        let indices: Vec<u32> = (0..(vertices.len() / 4) as u32)
            .flat_map(|quad| QUAD_INDICES.iter().map(move |i| quad * 4 + i))
            .collect();

        self.vertex_buffer = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sprite Vertex Buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        }));
        self.index_buffer = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sprite Index Buffer"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        }));
    }

    /// Draw the prepared frame
    pub fn render(&self, render_pass: &mut wgpu::RenderPass<'_>) {
        let (Some(vertex_buffer), Some(index_buffer)) = (&self.vertex_buffer, &self.index_buffer) else {
            return;
        };

        render_pass.set_pipeline(&self.render_pipeline);
        render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
        render_pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);

        for run in &self.runs {
            // Not uploaded yet; skipped until the next sync
            let Some(gpu) = self.textures.get(&run.texture) else {
                continue;
            };
            render_pass.set_bind_group(0, &gpu.bind_group, &[]);
            render_pass.draw_indexed(run.first_index..run.first_index + run.index_count, 0, 0..1);
        }
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Approximate GPU memory held by uploaded textures
    pub fn memory_usage(&self) -> usize {
        self.textures.values().map(|t| t.memory_size).sum()
    }
}

/// Turn sprites into NDC quads, merging neighbours that share a texture
pub fn build_quads<'a>(sprites: impl Iterator<Item = &'a Sprite>, camera: &IsoCamera) -> (Vec<SpriteVertex>, Vec<DrawRun>) {
    let mut vertices = Vec::new();
    let mut runs: Vec<DrawRun> = Vec::new();
    let (vw, vh) = (camera.viewport_width, camera.viewport_height);

    for sprite in sprites {
        let (left, top, right, bottom) = sprite.bounds();
        let (sl, st) = camera.world_to_screen(left, top);
        let (sr, sb) = camera.world_to_screen(right, bottom);
        if sr < 0.0 || sb < 0.0 || sl > vw as f64 || st > vh as f64 {
            continue;
        }

        let (x0, y0) = screen_to_ndc(sl as f32, st as f32, vw, vh);
        let (x1, y1) = screen_to_ndc(sr as f32, sb as f32, vw, vh);
        let color = [sprite.tint[0], sprite.tint[1], sprite.tint[2], sprite.tint[3] * sprite.alpha];
        vertices.extend_from_slice(&[
            SpriteVertex {
                position: [x0, y0],
                tex_coords: [0.0, 0.0],
                color,
            },
            SpriteVertex {
                position: [x1, y0],
                tex_coords: [1.0, 0.0],
                color,
            },
            SpriteVertex {
                position: [x1, y1],
                tex_coords: [1.0, 1.0],
                color,
            },
            SpriteVertex {
                position: [x0, y1],
                tex_coords: [0.0, 1.0],
                color,
            },
        ]);

        match runs.last_mut() {
            Some(run) if run.texture == sprite.texture => run.index_count += 6,
            _ => {
                let first_index = runs.last().map(|r| r.first_index + r.index_count).unwrap_or(0);
                runs.push(DrawRun {
                    texture: sprite.texture,
                    first_index,
                    index_count: 6,
                });
            }
        }
    }

    (vertices, runs)
}

/// Convert screen coordinates to NDC
pub fn screen_to_ndc(x: f32, y: f32, viewport_width: u32, viewport_height: u32) -> (f32, f32) {
    let ndc_x = (x / viewport_width as f32) * 2.0 - 1.0;
    let ndc_y = 1.0 - (y / viewport_height as f32) * 2.0;
    (ndc_x, ndc_y)
}
